//! Identifier and timestamp helpers.

mod ids;
pub mod timestamps;

pub use ids::generate_message_id;
pub use timestamps::{format_timestamp, now_utc, Timestamp};
