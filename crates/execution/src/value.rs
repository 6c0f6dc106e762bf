//! Shape helpers for the JSON values flowing between plan nodes.

use std::collections::HashMap;

use serde_json::Value;

use request_engine_errors::codes;
use request_engine_plan::{JoinCardinality, JoinChild, MapField, Record};

use crate::error::InterpretError;

/// Truthiness as used by `If` nodes: null, false and empty containers are
/// false, everything else is true.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Interpret a node result as a rowset.
pub(crate) fn into_rows(value: Value, context: &str) -> Result<Vec<Record>, InterpretError> {
    match value {
        Value::Null => Ok(vec![]),
        Value::Object(row) => Ok(vec![row]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(InterpretError::known(
                    codes::INVALID_PLAN_INPUT,
                    format!("{context}: expected a row, got {other}"),
                )),
            })
            .collect(),
        other => Err(InterpretError::known(
            codes::INVALID_PLAN_INPUT,
            format!("{context}: expected a rowset, got {other}"),
        )),
    }
}

/// Flatten sibling results into one list.
pub(crate) fn concat(parts: Vec<Value>) -> Value {
    let mut out = Vec::new();
    for part in parts {
        match part {
            Value::Array(items) => out.extend(items),
            Value::Null => {}
            other => out.push(other),
        }
    }
    Value::Array(out)
}

/// Add up numeric sibling results, typically affected-row counts.
pub(crate) fn sum(parts: Vec<Value>) -> Result<Value, InterpretError> {
    let mut any_float = false;
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    for part in parts {
        let Value::Number(n) = part else {
            return Err(InterpretError::known(
                codes::INVALID_PLAN_INPUT,
                format!("sum: expected a number, got {part}"),
            ));
        };
        match n.as_i64() {
            Some(i) => {
                int_total = int_total.saturating_add(i);
                float_total += i as f64;
            }
            None => {
                any_float = true;
                float_total += n.as_f64().unwrap_or_default();
            }
        }
    }
    if any_float {
        Ok(serde_json::Number::from_f64(float_total).map_or(Value::Null, Value::Number))
    } else {
        Ok(Value::from(int_total))
    }
}

/// Project and rename fields over a rowset.
pub(crate) fn map_rows(value: Value, fields: &[MapField]) -> Result<Value, InterpretError> {
    let rows = into_rows(value, "map input")?;
    let mapped = rows
        .into_iter()
        .map(|row| {
            let mut out = Record::new();
            for field in fields {
                let value = row.get(&field.source).cloned().unwrap_or(Value::Null);
                out.insert(field.target.clone(), value);
            }
            Value::Object(out)
        })
        .collect();
    Ok(Value::Array(mapped))
}

/// At most one row; more is ambiguous, zero is null.
pub(crate) fn unique(value: Value) -> Result<Value, InterpretError> {
    match value {
        Value::Array(mut items) => {
            if items.len() > 1 {
                return Err(InterpretError::known(
                    codes::AMBIGUOUS_RESULT,
                    format!("expected at most one row, got {}", items.len()),
                ));
            }
            Ok(items.pop().unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

/// Reject null and empty results.
pub(crate) fn required(value: Value) -> Result<Value, InterpretError> {
    let missing = match &value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if missing {
        return Err(InterpretError::known(
            codes::RECORD_NOT_FOUND,
            "a required record was not found",
        ));
    }
    Ok(value)
}

/// In-memory equi-join of a parent rowset with its children.
///
/// Parent row order is preserved. Each child bucket is consumed by the
/// first parent carrying its key, so no child row is ever attached to two
/// parents.
pub(crate) fn join(
    parent: Value,
    children: Vec<(Value, &JoinChild)>,
) -> Result<Value, InterpretError> {
    let mut parents = into_rows(parent, "join parent")?;

    for (child_value, spec) in children {
        let child_rows = into_rows(child_value, "join child")?;
        let parent_cols: Vec<&str> = spec.on.iter().map(|(p, _)| p.as_str()).collect();
        let child_cols: Vec<&str> = spec.on.iter().map(|(_, c)| c.as_str()).collect();

        let mut buckets: HashMap<String, Vec<Value>> = HashMap::new();
        for row in child_rows {
            let key = key_of(&row, &child_cols);
            buckets.entry(key).or_default().push(Value::Object(row));
        }

        for parent_row in &mut parents {
            let key = key_of(parent_row, &parent_cols);
            let matched = buckets.remove(&key).unwrap_or_default();
            let attached = match spec.cardinality {
                JoinCardinality::Many => Value::Array(matched),
                JoinCardinality::One => matched.into_iter().next().unwrap_or(Value::Null),
            };
            parent_row.insert(spec.parent_field.clone(), attached);
        }
    }

    Ok(Value::Array(parents.into_iter().map(Value::Object).collect()))
}

/// A hashable rendering of a row's join-key columns. Missing columns join
/// as nulls.
fn key_of(row: &Record, cols: &[&str]) -> String {
    let values: Vec<&Value> = cols
        .iter()
        .map(|col| row.get(*col).unwrap_or(&Value::Null))
        .collect();
    serde_json::to_string(&values).unwrap_or_default()
}
