//! Batch execution policies.

use serde_json::Value;
use tracing::{info_span, Instrument};

use request_engine_errors::{codes, RequestError};
use request_engine_plan::{BatchPlan, PlaceholderValues, Record};

use crate::error::InterpretError;
use crate::interpreter::{interpret, ExecutionContext};
use crate::value;

/// Execute a batch, producing one result slot per original request.
///
/// In multi mode a business failure is isolated to its slot while the
/// remaining slots still run; an infrastructure failure aborts the whole
/// batch with `Err`, so the caller can roll back any implicit
/// transaction. A compacted batch is one physical execution, so any
/// failure of the shared plan aborts it outright.
pub async fn execute_batch(
    batch: &BatchPlan,
    ctx: &ExecutionContext<'_>,
    placeholders: &PlaceholderValues,
) -> Result<Vec<Result<Value, RequestError>>, RequestError> {
    match batch {
        BatchPlan::Multi { plans } => execute_multi(plans, ctx, placeholders).await,
        BatchPlan::Compacted {
            plan,
            keys,
            arguments,
            expect_non_empty,
            nested_selection,
        } => {
            let merged = interpret(plan, ctx, placeholders)
                .instrument(info_span!("Execute compacted batch", slots = arguments.len()))
                .await
                .map_err(InterpretError::into_request_error)?;
            expand_compacted(merged, keys, arguments, *expect_non_empty, nested_selection)
        }
    }
}

async fn execute_multi(
    plans: &[request_engine_plan::PlanNode],
    ctx: &ExecutionContext<'_>,
    placeholders: &PlaceholderValues,
) -> Result<Vec<Result<Value, RequestError>>, RequestError> {
    let mut slots = Vec::with_capacity(plans.len());
    // Input order: all slots share one queryable, and a consistent
    // read/write sequence within a transaction depends on it.
    for (index, plan) in plans.iter().enumerate() {
        let result = interpret(plan, ctx, placeholders)
            .instrument(info_span!("Execute batch slot", index))
            .await;
        match result {
            Ok(value) => slots.push(Ok(value)),
            Err(err) if err.is_infrastructure() => {
                tracing::error!(index, "batch aborted by infrastructure failure: {err}");
                return Err(err.into_request_error());
            }
            Err(err) => slots.push(Err(err.into_request_error())),
        }
    }
    Ok(slots)
}

/// Reconstruct per-request results from the merged rowset of a compacted
/// batch. Output order equals `arguments` order, one slot per argument,
/// regardless of merged-row order.
fn expand_compacted(
    merged: Value,
    keys: &[String],
    arguments: &[Record],
    expect_non_empty: bool,
    nested_selection: &[String],
) -> Result<Vec<Result<Value, RequestError>>, RequestError> {
    let rows = value::into_rows(merged, "compacted result")
        .map_err(InterpretError::into_request_error)?;

    let slots = arguments
        .iter()
        .map(|argument| {
            let matched = rows.iter().find(|row| {
                keys.iter().all(|key| {
                    row.get(key).unwrap_or(&Value::Null)
                        == argument.get(key).unwrap_or(&Value::Null)
                })
            });
            match matched {
                Some(row) => Ok(project(row, nested_selection)),
                None if expect_non_empty => Err(RequestError::known(
                    codes::RECORD_NOT_FOUND,
                    "no row matched the request keys",
                )),
                None => Ok(Value::Null),
            }
        })
        .collect();

    Ok(slots)
}

/// Keep only the columns named by the nested selection; an empty
/// selection keeps the whole row.
fn project(row: &Record, nested_selection: &[String]) -> Value {
    if nested_selection.is_empty() {
        return Value::Object(row.clone());
    }
    let mut out = Record::new();
    for column in nested_selection {
        out.insert(
            column.clone(),
            row.get(column).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}
