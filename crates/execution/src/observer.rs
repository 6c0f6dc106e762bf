//! The per-statement observability hook.
//!
//! This is a pass-through: the engine never changes control flow based on
//! what an observer does.

use std::time::Duration;

/// Where a statement was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Primary,
    ReadReplica,
    Transaction,
}

impl QueryTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryTarget::Primary => "primary",
            QueryTarget::ReadReplica => "read_replica",
            QueryTarget::Transaction => "transaction",
        }
    }
}

/// One leaf statement, reported after it completes.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub sql: String,
    pub params: Vec<serde_json::Value>,
    pub duration: Duration,
    pub target: QueryTarget,
}

/// Invoked once per leaf `Query`/`Execute`.
pub trait QueryObserver: Send + Sync {
    fn on_query(&self, event: QueryEvent);
}
