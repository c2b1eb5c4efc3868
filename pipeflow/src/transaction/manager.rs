//! Transaction manager abstraction and an in-memory implementation.

use crate::errors::TransactionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A transaction started by a [`TransactionManager`].
#[derive(Debug)]
pub struct Transaction {
    id: Uuid,
    name: String,
    timeout: Option<Duration>,
    rollback_only: AtomicBool,
    completed: AtomicBool,
}

impl Transaction {
    /// Creates an active transaction.
    #[must_use]
    pub fn new(name: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timeout,
            rollback_only: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    /// Unique id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Name, usually the owning pipe or pipeline.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeout the transaction was started with.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Marks the transaction so it can only roll back.
    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    /// Returns true when marked rollback-only.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Returns true once committed or rolled back.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Marks the transaction completed. Returns false if it already was.
    pub fn mark_completed(&self) -> bool {
        !self.completed.swap(true, Ordering::SeqCst)
    }
}

/// Begin/commit/rollback provider.
#[async_trait]
pub trait TransactionManager: Send + Sync + Debug {
    /// Starts a new transaction.
    async fn begin(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<Transaction>, TransactionError>;

    /// Commits a transaction.
    async fn commit(&self, tx: &Transaction) -> Result<(), TransactionError>;

    /// Rolls a transaction back.
    async fn rollback(&self, tx: &Transaction) -> Result<(), TransactionError>;

    /// Marks a transaction rollback-only.
    fn set_rollback_only(&self, tx: &Transaction) {
        tx.set_rollback_only();
    }
}

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// Records transactions in memory. Useful as a default and in tests.
#[derive(Debug, Default)]
pub struct InMemoryTransactionManager {
    started: Mutex<Vec<Arc<Transaction>>>,
    outcomes: Mutex<Vec<(String, TransactionOutcome)>>,
    fail_commits: AtomicBool,
}

impl InMemoryTransactionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// All transactions started, oldest first.
    #[must_use]
    pub fn started(&self) -> Vec<Arc<Transaction>> {
        self.started.lock().clone()
    }

    /// Completion outcomes by transaction name, in completion order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(String, TransactionOutcome)> {
        self.outcomes.lock().clone()
    }

    fn complete(&self, tx: &Transaction, outcome: TransactionOutcome) -> Result<(), TransactionError> {
        if !tx.mark_completed() {
            return Err(TransactionError::AlreadyCompleted {
                name: tx.name().to_string(),
            });
        }
        debug!(tx = %tx.name(), id = %tx.id(), ?outcome, "Transaction completed");
        self.outcomes.lock().push((tx.name().to_string(), outcome));
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<Arc<Transaction>, TransactionError> {
        let tx = Arc::new(Transaction::new(name, timeout));
        debug!(tx = %name, id = %tx.id(), "Transaction started");
        self.started.lock().push(tx.clone());
        Ok(tx)
    }

    async fn commit(&self, tx: &Transaction) -> Result<(), TransactionError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(TransactionError::Commit {
                name: tx.name().to_string(),
                reason: "commit refused".to_string(),
            });
        }
        self.complete(tx, TransactionOutcome::Committed)
    }

    async fn rollback(&self, tx: &Transaction) -> Result<(), TransactionError> {
        self.complete(tx, TransactionOutcome::RolledBack)
    }
}
