//! Handlers run after every pipeline run.

use crate::core::PipeLineResult;
use crate::session::Session;
use async_trait::async_trait;
use std::fmt::Debug;

/// Called once a run has finished, successfully or not.
///
/// Errors (and panics) are logged by the engine and never replace the
/// outcome of the run.
#[async_trait]
pub trait ExitHandler: Send + Sync + Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Receives the result, or `None` when the run ended with an error.
    async fn at_end_of_pipeline(
        &self,
        message_id: &str,
        result: Option<&PipeLineResult>,
        session: &Session,
    ) -> anyhow::Result<()>;
}
