//! Guarded execution of one unit of work inside a transaction scope.

use super::{Transaction, TransactionAttribute, TransactionAttributes, TransactionManager, CURRENT_TRANSACTION_KEY};
use crate::core::ProcessOutcome;
use crate::errors::{PipeRunError, TransactionError};
use crate::session::Session;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of one guarded execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardState {
    /// Created, nothing begun.
    NotStarted,
    /// Work in progress.
    Running,
    /// The timeout fired; rollback follows.
    TimedOut,
    /// Finished and committed (or completed without a transaction).
    CompletedCommit,
    /// Finished and rolled back (or completed in error without a transaction).
    CompletedRollback,
}

impl GuardState {
    /// Returns true for the two completed states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::CompletedCommit | Self::CompletedRollback)
    }
}

enum Scope {
    New(Arc<Transaction>),
    Joined(Arc<Transaction>),
    Without,
}

impl Scope {
    const fn transaction(&self) -> Option<&Arc<Transaction>> {
        match self {
            Self::New(tx) | Self::Joined(tx) => Some(tx),
            Self::Without => None,
        }
    }
}

/// Demarcates a transaction around one execution. Not reusable.
pub struct TransactionGuard {
    owner: String,
    attributes: TransactionAttributes,
    manager: Arc<dyn TransactionManager>,
    state: GuardState,
    scope: Option<Scope>,
}

impl TransactionGuard {
    /// Creates a guard for one execution.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        attributes: TransactionAttributes,
        manager: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            owner: owner.into(),
            attributes,
            manager,
            state: GuardState::NotStarted,
            scope: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> GuardState {
        self.state
    }

    /// The transaction this guard began or joined, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.scope.as_ref().and_then(Scope::transaction).cloned()
    }

    /// Runs `work` inside the scope.
    ///
    /// The scope is marked rollback-only when the work fails, returns an
    /// outcome that requires rollback, or times out. Commit or rollback
    /// always runs before this returns. A failure of the work itself is
    /// returned unchanged, including interruptions the guard did not cause.
    pub async fn execute<T, F>(&mut self, session: &Session, work: F) -> Result<T, PipeRunError>
    where
        T: ProcessOutcome + Send,
        F: Future<Output = Result<T, PipeRunError>> + Send,
    {
        if self.state != GuardState::NotStarted {
            return Err(PipeRunError::failed(format!(
                "Transaction guard of [{}] cannot be reused",
                self.owner
            )));
        }

        let outer = session.get_object::<Transaction>(CURRENT_TRANSACTION_KEY);
        let scope = self.open_scope(outer.clone()).await?;
        match scope.transaction() {
            Some(tx) => session.put_object(CURRENT_TRANSACTION_KEY, tx.clone()),
            None => {
                session.remove(CURRENT_TRANSACTION_KEY);
            }
        }
        self.scope = Some(scope);
        self.state = GuardState::Running;

        let result = match self.attributes.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, work).await {
                Ok(result) => result,
                Err(_) => {
                    self.state = GuardState::TimedOut;
                    warn!(owner = %self.owner, timeout_ms = timeout.as_millis() as u64, "Transaction timed out");
                    Err(PipeRunError::timeout(&self.owner, timeout))
                }
            },
            None => work.await,
        };

        let rollback = self.state == GuardState::TimedOut
            || match &result {
                Ok(outcome) => outcome.requires_rollback(),
                Err(_) => true,
            };
        let completion = self.complete(rollback).await;

        match outer {
            Some(tx) => session.put_object(CURRENT_TRANSACTION_KEY, tx),
            None => {
                session.remove(CURRENT_TRANSACTION_KEY);
            }
        }

        match (result, completion) {
            (Err(err), Err(completion_err)) => {
                warn!(owner = %self.owner, error = %completion_err, "Transaction completion failed after error");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(completion_err)) => Err(completion_err.into()),
        }
    }

    async fn open_scope(&self, outer: Option<Arc<Transaction>>) -> Result<Scope, TransactionError> {
        let begin = || self.manager.begin(&self.owner, self.attributes.timeout);
        let scope = match (self.attributes.attribute, outer) {
            (TransactionAttribute::Required | TransactionAttribute::Supports | TransactionAttribute::Mandatory, Some(tx)) => {
                Scope::Joined(tx)
            }
            (TransactionAttribute::Required | TransactionAttribute::RequiresNew, None)
            | (TransactionAttribute::RequiresNew, Some(_)) => Scope::New(begin().await?),
            (TransactionAttribute::Mandatory, None) => {
                return Err(TransactionError::MandatoryWithoutTransaction {
                    name: self.owner.clone(),
                })
            }
            (TransactionAttribute::Never, Some(_)) => {
                return Err(TransactionError::NeverWithTransaction {
                    name: self.owner.clone(),
                })
            }
            (TransactionAttribute::Supports | TransactionAttribute::NotSupported | TransactionAttribute::Never, None)
            | (TransactionAttribute::NotSupported, Some(_)) => Scope::Without,
        };
        debug!(
            owner = %self.owner,
            attribute = %self.attributes.attribute,
            joined = matches!(scope, Scope::Joined(_)),
            new = matches!(scope, Scope::New(_)),
            "Opened transaction scope"
        );
        Ok(scope)
    }

    async fn complete(&mut self, rollback: bool) -> Result<(), TransactionError> {
        let Some(scope) = self.scope.as_ref() else {
            return Ok(());
        };

        if rollback {
            if let Some(tx) = scope.transaction() {
                self.manager.set_rollback_only(tx);
            }
        }

        match scope {
            Scope::New(tx) if rollback || tx.is_rollback_only() => {
                self.state = GuardState::CompletedRollback;
                if let Err(err) = self.manager.rollback(tx).await {
                    warn!(owner = %self.owner, error = %err, "Rollback failed");
                }
                Ok(())
            }
            Scope::New(tx) => match self.manager.commit(tx).await {
                Ok(()) => {
                    self.state = GuardState::CompletedCommit;
                    Ok(())
                }
                Err(err) => {
                    self.state = GuardState::CompletedRollback;
                    if let Err(rollback_err) = self.manager.rollback(tx).await {
                        debug!(owner = %self.owner, error = %rollback_err, "Rollback after failed commit failed");
                    }
                    Err(err)
                }
            },
            Scope::Joined(_) | Scope::Without => {
                self.state = if rollback {
                    GuardState::CompletedRollback
                } else {
                    GuardState::CompletedCommit
                };
                Ok(())
            }
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if matches!(self.state, GuardState::Running | GuardState::TimedOut) {
            if let Some(tx) = self.scope.as_ref().and_then(Scope::transaction) {
                warn!(owner = %self.owner, "Transaction guard dropped before completion; marking rollback-only");
                tx.set_rollback_only();
            }
        }
    }
}

impl std::fmt::Debug for TransactionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("owner", &self.owner)
            .field("attributes", &self.attributes)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExitState, PipeLineResult};
    use crate::transaction::{InMemoryTransactionManager, TransactionOutcome};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    enum Work {
        Succeeds,
        ErrorState,
        Throws,
    }

    async fn run_work(work: Work, delay: Duration) -> Result<PipeLineResult, PipeRunError> {
        tokio::time::sleep(delay).await;
        match work {
            Work::Succeeds => Ok(PipeLineResult::new("ok", ExitState::Success, 0)),
            Work::ErrorState => Ok(PipeLineResult::new("bad", ExitState::Error, 1)),
            Work::Throws => Err(PipeRunError::pipe_failed("work", "boom")),
        }
    }

    fn guard(
        attribute: TransactionAttribute,
        timeout: Option<Duration>,
        manager: &Arc<InMemoryTransactionManager>,
    ) -> TransactionGuard {
        let mut attrs = TransactionAttributes::new(attribute);
        attrs.timeout = timeout;
        TransactionGuard::new("unit", attrs, manager.clone())
    }

    #[tokio::test]
    async fn test_rollback_matrix() {
        for work in [Work::Succeeds, Work::ErrorState, Work::Throws] {
            for times_out in [false, true] {
                let manager = Arc::new(InMemoryTransactionManager::new());
                let session = Session::new();
                let (timeout, delay) = if times_out {
                    (Some(Duration::from_millis(10)), Duration::from_millis(200))
                } else {
                    (Some(Duration::from_secs(5)), Duration::ZERO)
                };
                let mut g = guard(TransactionAttribute::Required, timeout, &manager);
                let result = g.execute(&session, run_work(work, delay)).await;

                let tx = g.transaction().unwrap();
                let expect_commit = matches!(work, Work::Succeeds) && !times_out;
                assert_eq!(tx.is_rollback_only(), !expect_commit, "{work:?} timeout={times_out}");
                assert!(tx.is_completed());
                assert!(g.state().is_terminal());
                if expect_commit {
                    assert_eq!(g.state(), GuardState::CompletedCommit);
                    assert_eq!(manager.outcomes()[0].1, TransactionOutcome::Committed);
                } else {
                    assert_eq!(g.state(), GuardState::CompletedRollback);
                    assert_eq!(manager.outcomes()[0].1, TransactionOutcome::RolledBack);
                }
                match (work, times_out) {
                    (_, true) => assert!(matches!(result, Err(PipeRunError::Timeout { .. }))),
                    (Work::Throws, false) => assert!(matches!(result, Err(PipeRunError::Failed { .. }))),
                    (_, false) => assert!(result.is_ok()),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_unrelated_interruption_propagates() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let session = Session::new();
        let mut g = guard(TransactionAttribute::Required, Some(Duration::from_secs(5)), &manager);
        let result: Result<PipeLineResult, _> = g
            .execute(&session, async { Err(PipeRunError::interrupted("throttle", "closed")) })
            .await;
        assert!(matches!(result, Err(PipeRunError::Interrupted { ref owner, .. }) if owner == "throttle"));
        assert_eq!(g.state(), GuardState::CompletedRollback);
    }

    #[tokio::test]
    async fn test_guard_not_reusable() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let session = Session::new();
        let mut g = guard(TransactionAttribute::Required, None, &manager);
        g.execute(&session, run_work(Work::Succeeds, Duration::ZERO)).await.unwrap();
        assert!(g.execute(&session, run_work(Work::Succeeds, Duration::ZERO)).await.is_err());
        assert_eq!(manager.started().len(), 1);
    }

    #[tokio::test]
    async fn test_joined_scope_marks_outer_rollback_only() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let session = Session::new();
        let outer = manager.begin("outer", None).await.unwrap();
        session.put_object(CURRENT_TRANSACTION_KEY, outer.clone());

        let mut g = guard(TransactionAttribute::Required, None, &manager);
        let _ = g.execute(&session, run_work(Work::ErrorState, Duration::ZERO)).await;

        assert!(outer.is_rollback_only());
        assert!(!outer.is_completed());
        assert_eq!(manager.started().len(), 1);
        let current = session.get_object::<Transaction>(CURRENT_TRANSACTION_KEY).unwrap();
        assert_eq!(current.id(), outer.id());
    }

    #[tokio::test]
    async fn test_requires_new_suspends_outer() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let session = Session::new();
        let outer = manager.begin("outer", None).await.unwrap();
        session.put_object(CURRENT_TRANSACTION_KEY, outer.clone());

        let mut g = guard(TransactionAttribute::RequiresNew, None, &manager);
        g.execute(&session, run_work(Work::Throws, Duration::ZERO)).await.unwrap_err();

        assert!(!outer.is_rollback_only());
        assert_eq!(manager.started().len(), 2);
        assert_eq!(manager.outcomes(), vec![("unit".to_string(), TransactionOutcome::RolledBack)]);
    }

    #[tokio::test]
    async fn test_mandatory_and_never() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let session = Session::new();

        let mut g = guard(TransactionAttribute::Mandatory, None, &manager);
        let err = g.execute(&session, run_work(Work::Succeeds, Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, PipeRunError::Transaction(TransactionError::MandatoryWithoutTransaction { .. })));

        session.put_object(CURRENT_TRANSACTION_KEY, manager.begin("outer", None).await.unwrap());
        let mut g = guard(TransactionAttribute::Never, None, &manager);
        let err = g.execute(&session, run_work(Work::Succeeds, Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, PipeRunError::Transaction(TransactionError::NeverWithTransaction { .. })));
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        manager.fail_commits(true);
        let session = Session::new();
        let mut g = guard(TransactionAttribute::Required, None, &manager);
        let err = g.execute(&session, run_work(Work::Succeeds, Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, PipeRunError::Transaction(TransactionError::Commit { .. })));
        assert_eq!(g.state(), GuardState::CompletedRollback);
    }

    #[tokio::test]
    async fn test_without_transaction_still_times_out() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let session = Session::new();
        let mut g = guard(TransactionAttribute::Supports, Some(Duration::from_millis(5)), &manager);
        let err = g
            .execute(&session, run_work(Work::Succeeds, Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipeRunError::Timeout { .. }));
        assert!(manager.started().is_empty());
        assert_eq!(g.state(), GuardState::CompletedRollback);
    }
}
