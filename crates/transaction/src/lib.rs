//! Interactive transaction lifecycle.
//!
//! The [`manager::TransactionManager`] owns every caller-driven
//! transaction: it maps isolation levels to the provider vocabulary,
//! enforces the concurrency limit, arms a timeout watchdog per
//! transaction, and is the only writer of a transaction's status.

pub mod manager;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use request_engine_adapters::IsolationLevel;

pub use manager::{TransactionHandle, TransactionManager};

/// Opaque transaction id handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub fn new() -> Self {
        TxId(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TxId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TxId(Uuid::parse_str(s)?))
    }
}

/// Lifecycle status. The three terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Registered, native begin not yet confirmed.
    Pending,
    Running,
    Committed,
    RolledBack,
    TimedOut,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed
                | TransactionStatus::RolledBack
                | TransactionStatus::TimedOut
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Running => "running",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Caller-supplied options for `startTransaction`.
#[derive(Debug, Clone, Copy)]
pub struct TransactionOptions {
    pub isolation_level: Option<IsolationLevel>,
    /// How long to wait for a free slot before failing with Busy.
    pub max_wait: Duration,
    /// Deadline after which the watchdog rolls the transaction back.
    pub timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            isolation_level: None,
            max_wait: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
        }
    }
}
