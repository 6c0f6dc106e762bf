//! The driver-adapter boundary.
//!
//! Everything the engine knows about physical database connectivity lives
//! behind the traits in this crate: a [`Queryable`] runs statements, a
//! [`Transaction`] adds commit/rollback, and a [`DriverAdapter`] hands out
//! both. Connection pooling is owned entirely by the adapter.

pub mod isolation;
pub mod postgres;
pub mod queryable;

pub use isolation::{ConnectionInfo, IsolationLevel, Provider};
pub use postgres::{PostgresAdapter, PostgresSettings};
pub use queryable::{DriverAdapter, Queryable, ResultSet, Transaction};
