//! Transaction demarcation.
//!
//! The engine does not implement transactions itself. It drives an
//! externally supplied [`TransactionManager`] through a [`TransactionGuard`],
//! which applies the propagation attribute, enforces the timeout and decides
//! between commit and rollback from the outcome of the guarded work.

mod guard;
mod manager;

pub use guard::{GuardState, TransactionGuard};
pub use manager::{InMemoryTransactionManager, Transaction, TransactionManager, TransactionOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Session key under which the active transaction is carried.
pub const CURRENT_TRANSACTION_KEY: &str = "__currentTransaction";

/// Propagation behaviour of a transactional pipe or pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionAttribute {
    /// Join an existing transaction, or run without one.
    Supports,
    /// Join an existing transaction, or start one.
    Required,
    /// Always start a new transaction, suspending any existing one.
    RequiresNew,
    /// Join an existing transaction; fail if there is none.
    Mandatory,
    /// Run without a transaction, suspending any existing one.
    NotSupported,
    /// Run without a transaction; fail if there is one.
    Never,
}

impl Default for TransactionAttribute {
    fn default() -> Self {
        Self::Supports
    }
}

impl TransactionAttribute {
    /// Returns true when this attribute can start a transaction.
    #[must_use]
    pub const fn is_transactional(&self) -> bool {
        matches!(self, Self::Required | Self::RequiresNew | Self::Mandatory)
    }
}

impl fmt::Display for TransactionAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Supports => "supports",
            Self::Required => "required",
            Self::RequiresNew => "requires_new",
            Self::Mandatory => "mandatory",
            Self::NotSupported => "not_supported",
            Self::Never => "never",
        };
        f.write_str(name)
    }
}

/// Transaction settings of a pipe or pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionAttributes {
    /// Propagation behaviour.
    #[serde(default)]
    pub attribute: TransactionAttribute,
    /// Timeout of the guarded work; `None` means no timeout.
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
}

impl TransactionAttributes {
    /// Creates attributes without a timeout.
    #[must_use]
    pub const fn new(attribute: TransactionAttribute) -> Self {
        Self {
            attribute,
            timeout: None,
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns true when the guard has nothing to do.
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        matches!(self.attribute, TransactionAttribute::Supports) && self.timeout.is_none()
    }
}

mod optional_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.filter(|s| *s > 0.0).map(Duration::from_secs_f64))
    }
}
