//! The execution core of a database-client runtime.
//!
//! Takes pre-compiled query plans from an external planner and executes
//! them against a pluggable driver adapter, coordinating interactive and
//! batched transactions on the way. The pieces live in their own crates;
//! this one ties them together behind [`RequestEngine`].

pub mod config;
pub mod engine;

pub use config::EngineConfig;
pub use engine::{RequestEngine, RequestOptions, TransactionRequest};

pub use request_engine_adapters::{
    ConnectionInfo, DriverAdapter, IsolationLevel, PostgresAdapter, PostgresSettings, Provider,
    Queryable,
};
pub use request_engine_errors::{codes, DriverError, RequestError, TransactionError};
pub use request_engine_execution::{QueryEvent, QueryObserver, QueryTarget};
pub use request_engine_plan::{BatchPlan, PlaceholderValues, PlanNode};
pub use request_engine_transaction::{TransactionOptions, TransactionStatus, TxId};
