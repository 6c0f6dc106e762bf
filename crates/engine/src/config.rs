//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use request_engine_transaction::TransactionOptions;

/// Runtime limits and defaults for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on simultaneously running interactive transactions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_transactions: usize,
    /// How long `startTransaction` waits for a free slot.
    #[serde(default = "default_max_wait_ms")]
    pub default_max_wait_ms: u64,
    /// Watchdog deadline for transactions that do not set their own.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_max_concurrent() -> usize {
    32
}

fn default_max_wait_ms() -> u64 {
    2000
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrent_transactions: default_max_concurrent(),
            default_max_wait_ms: default_max_wait_ms(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Transaction options carrying this config's defaults.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation_level: None,
            max_wait: Duration::from_millis(self.default_max_wait_ms),
            timeout: Duration::from_millis(self.default_timeout_ms),
        }
    }
}
