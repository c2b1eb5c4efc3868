//! Message id generation.

use uuid::Uuid;

/// Generates a message id for messages that arrive without one.
///
/// Time-ordered so ids sort in arrival order in logs.
#[must_use]
pub fn generate_message_id() -> String {
    format!("pf-{}", Uuid::now_v7())
}
