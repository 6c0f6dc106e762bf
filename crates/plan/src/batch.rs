//! Batch request variants.

use serde::{Deserialize, Serialize};

use crate::node::PlanNode;
use crate::Record;

/// A batch of requests, as produced by the planner.
///
/// `Multi` carries one plan per original request. `Compacted` carries a
/// single merged plan whose rowset is later disambiguated per request by
/// key matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "batch", rename_all = "camelCase")]
pub enum BatchPlan {
    Multi {
        plans: Vec<PlanNode>,
    },
    #[serde(rename_all = "camelCase")]
    Compacted {
        plan: PlanNode,
        /// Columns correlating a merged row back to exactly one element of
        /// `arguments`.
        keys: Vec<String>,
        /// One entry per original request, in request order.
        arguments: Vec<Record>,
        /// Synthesize a missing-record error (instead of a null success)
        /// for arguments without a matching row.
        expect_non_empty: bool,
        /// Columns to keep on each matched row; empty keeps the whole row.
        nested_selection: Vec<String>,
    },
}

impl BatchPlan {
    /// Number of per-request result slots this batch must produce.
    pub fn len(&self) -> usize {
        match self {
            BatchPlan::Multi { plans } => plans.len(),
            BatchPlan::Compacted { arguments, .. } => arguments.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            BatchPlan::Multi { plans } => plans.iter().all(PlanNode::is_read_only),
            BatchPlan::Compacted { plan, .. } => plan.is_read_only(),
        }
    }
}
