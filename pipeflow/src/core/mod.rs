//! Core value types shared by the engine and the processor chain.

mod forward;
mod result;
mod status;

pub use forward::{PipeForward, PipeRunResult, EXCEPTION_FORWARD_NAME, SUCCESS_FORWARD_NAME};
pub use result::{PipeLineExit, PipeLineResult, ProcessOutcome, DEFAULT_SUCCESS_EXIT_NAME};
pub use status::ExitState;
