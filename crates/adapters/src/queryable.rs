//! Connection traits.

use std::sync::Arc;

use async_trait::async_trait;
use request_engine_errors::DriverError;

use crate::isolation::{ConnectionInfo, IsolationLevel};

/// Rows from the driver, one JSON object per row.
pub type ResultSet = Vec<serde_json::Map<String, serde_json::Value>>;

/// A connection (or transaction-scoped connection) that can run statements.
///
/// A queryable is exclusively owned by one logical caller at a time;
/// implementations backed by a single physical connection serialize
/// statements internally so that submission order is execution order.
#[async_trait]
pub trait Queryable: Send + Sync {
    /// Run a statement returning rows.
    async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError>;

    /// Run a statement returning an affected-row count.
    async fn execute(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError>;
}

/// A transaction-bound connection. Consuming commit/rollback makes reuse
/// after close a compile error rather than a runtime one.
#[async_trait]
pub trait Transaction: Queryable {
    async fn commit(self: Box<Self>) -> Result<(), DriverError>;
    async fn rollback(self: Box<Self>) -> Result<(), DriverError>;
}

/// The external collaborator providing physical database connectivity.
///
/// The adapter itself is the autocommit [`Queryable`]; statements issued
/// through it see no cross-statement ordering guarantee.
#[async_trait]
pub trait DriverAdapter: Queryable {
    /// Provider metadata used for capability checks, e.g. which isolation
    /// levels are available.
    fn connection_info(&self) -> ConnectionInfo;

    /// Begin a native transaction, optionally at the given isolation level.
    ///
    /// The caller is expected to have validated the isolation level against
    /// [`Self::connection_info`] first; an unsupported level reaching the
    /// driver is a driver error.
    async fn start_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>, DriverError>;

    /// A read-replica connection, when one is configured. Pure-read work
    /// outside an explicit transaction may be routed here.
    fn reader(&self) -> Option<Arc<dyn Queryable>>;

    /// Release all pooled connections. The adapter is unusable afterwards.
    async fn dispose(&self) -> Result<(), DriverError>;
}
