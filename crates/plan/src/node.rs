//! Plan tree nodes.
//!
//! A plan is an acyclic, rooted tree of tagged nodes. Every node's output
//! shape is what its parent consumes, and each node is evaluated exactly
//! once per execution (except the untaken branch of `If`, which is never
//! evaluated at all).

use serde::{Deserialize, Serialize};

/// A single node of a compiled query plan.
///
/// The enum is deliberately exhaustive: a new node kind must be handled
/// everywhere a plan is consumed before the workspace compiles again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum PlanNode {
    /// A literal value, returned unchanged.
    Value { value: serde_json::Value },
    /// Read a variable bound by an enclosing `Let` or by the placeholder
    /// values of the execution.
    Get { name: String },
    /// Bind variables for the duration of `expr`.
    Let {
        bindings: Vec<Binding>,
        expr: Box<PlanNode>,
    },
    /// A leaf SQL statement returning a rowset.
    Query { sql: String, params: Vec<SqlParam> },
    /// A leaf SQL statement returning an affected-row count.
    Execute { sql: String, params: Vec<SqlParam> },
    /// Concatenate sibling results into one list.
    Concat { parts: Vec<PlanNode> },
    /// Sum numeric sibling results (typically affected counts).
    Sum { parts: Vec<PlanNode> },
    /// Project and rename fields of a rowset.
    Map {
        records: Box<PlanNode>,
        fields: Vec<MapField>,
    },
    /// Branch on the truthiness of `condition`; the untaken branch is lazy.
    If {
        condition: Box<PlanNode>,
        then: Box<PlanNode>,
        #[serde(rename = "else")]
        otherwise: Box<PlanNode>,
    },
    /// Expect at most one row; more than one is an ambiguous result.
    Unique { records: Box<PlanNode> },
    /// Expect a non-null, non-empty result; anything else is a missing
    /// record.
    Required { records: Box<PlanNode> },
    /// Merge a parent rowset with child rowsets by declared join keys,
    /// preserving parent cardinality and ordering.
    Join {
        parent: Box<PlanNode>,
        children: Vec<JoinChild>,
    },
}

/// A named subtree bound by a `Let` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub node: PlanNode,
}

/// A positional parameter of a leaf statement: either a literal value or a
/// reference into the placeholder values supplied with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum SqlParam {
    Value(serde_json::Value),
    Placeholder(String),
}

/// One child subtree of a `Join` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChild {
    /// The child subtree producing the rows to attach.
    pub child: PlanNode,
    /// Pairs of (parent column, child column) correlating rows.
    pub on: Vec<(String, String)>,
    /// The parent field under which matching children are attached.
    pub parent_field: String,
    pub cardinality: JoinCardinality,
}

/// Declared cardinality of a join child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinCardinality {
    /// Unmatched parents get `null`; at most one child row is attached.
    One,
    /// Unmatched parents get `[]`.
    Many,
}

/// A field projection of a `Map` node: `source` column renamed to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapField {
    pub source: String,
    pub target: String,
}

impl PlanNode {
    /// Whether the plan contains no writing leaf.
    ///
    /// Pure-read plans outside an explicit transaction may be routed to a
    /// read replica.
    pub fn is_read_only(&self) -> bool {
        match self {
            PlanNode::Execute { .. } => false,
            PlanNode::Value { .. } | PlanNode::Get { .. } | PlanNode::Query { .. } => true,
            PlanNode::Let { bindings, expr } => {
                bindings.iter().all(|b| b.node.is_read_only()) && expr.is_read_only()
            }
            PlanNode::Concat { parts } | PlanNode::Sum { parts } => {
                parts.iter().all(PlanNode::is_read_only)
            }
            PlanNode::Map { records, .. }
            | PlanNode::Unique { records }
            | PlanNode::Required { records } => records.is_read_only(),
            PlanNode::If {
                condition,
                then,
                otherwise,
            } => condition.is_read_only() && then.is_read_only() && otherwise.is_read_only(),
            PlanNode::Join { parent, children } => {
                parent.is_read_only() && children.iter().all(|c| c.child.is_read_only())
            }
        }
    }
}
