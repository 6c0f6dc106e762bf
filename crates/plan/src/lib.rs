//! The query-plan intermediate representation executed by the engine.
//!
//! Plans arrive pre-compiled from an external planner; this crate only
//! defines their shape and a few structural helpers. Evaluation lives in
//! `request-engine-execution`.

pub mod batch;
pub mod node;

pub use batch::BatchPlan;
pub use node::{JoinCardinality, JoinChild, MapField, PlanNode, SqlParam};

use std::collections::BTreeMap;

/// A row as produced by the driver boundary: column name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The immutable input bindings supplied for one execution.
///
/// Supplied once per `request` and never mutated during evaluation;
/// `Let` bindings layer on top of these without touching them.
pub type PlaceholderValues = BTreeMap<String, serde_json::Value>;
