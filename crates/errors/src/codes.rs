//! Stable machine-readable error codes.
//!
//! These are part of the public contract: clients match on them
//! programmatically, so existing codes must never change meaning.

/// A `Required` node evaluated to null or an empty rowset, or a compacted
/// batch slot with `expect_non_empty` found no matching row.
pub const RECORD_NOT_FOUND: &str = "RECORD_NOT_FOUND";

/// A `Unique` node saw more than one row.
pub const AMBIGUOUS_RESULT: &str = "AMBIGUOUS_RESULT";

/// A leaf statement referenced a placeholder that was not supplied.
pub const MISSING_PLACEHOLDER: &str = "MISSING_PLACEHOLDER";

/// A combinator received a value of a shape it cannot consume.
pub const INVALID_PLAN_INPUT: &str = "INVALID_PLAN_INPUT";
