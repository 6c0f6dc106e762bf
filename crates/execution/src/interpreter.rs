//! The plan interpreter.
//!
//! Evaluation is depth-first and sequential: leaf statements run one at a
//! time on the shared queryable, so statement submission order is
//! deterministic on a single connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info_span, Instrument};

use request_engine_errors::codes;
use request_engine_plan::{PlaceholderValues, PlanNode, SqlParam};

use request_engine_adapters::Queryable;

use crate::error::InterpretError;
use crate::observer::{QueryEvent, QueryObserver, QueryTarget};
use crate::value;

/// What one plan evaluation runs against.
pub struct ExecutionContext<'a> {
    pub queryable: &'a dyn Queryable,
    pub observer: Option<Arc<dyn QueryObserver>>,
    pub target: QueryTarget,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(queryable: &'a dyn Queryable, target: QueryTarget) -> Self {
        ExecutionContext {
            queryable,
            observer: None,
            target,
        }
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn QueryObserver>>) -> Self {
        self.observer = observer;
        self
    }
}

/// Evaluate a plan tree to a value.
///
/// The placeholder values are never mutated; `Let` bindings shadow them
/// for the duration of their body only.
pub async fn interpret(
    plan: &PlanNode,
    ctx: &ExecutionContext<'_>,
    placeholders: &PlaceholderValues,
) -> Result<Value, InterpretError> {
    let mut env = Env {
        placeholders,
        bindings: HashMap::new(),
    };
    eval(plan, ctx, &mut env)
        .instrument(info_span!("Interpret plan"))
        .await
}

/// Variable scope for one evaluation: `Let` bindings layered over the
/// immutable placeholder values.
struct Env<'p> {
    placeholders: &'p PlaceholderValues,
    bindings: HashMap<String, Value>,
}

impl Env<'_> {
    fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.placeholders.get(name))
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn eval<'a>(
    node: &'a PlanNode,
    ctx: &'a ExecutionContext<'_>,
    env: &'a mut Env<'_>,
) -> BoxFuture<'a, Result<Value, InterpretError>> {
    Box::pin(async move {
        match node {
            PlanNode::Value { value } => Ok(value.clone()),

            PlanNode::Get { name } => env.get(name).cloned().ok_or_else(|| {
                InterpretError::known(
                    codes::MISSING_PLACEHOLDER,
                    format!("variable '{name}' is not bound"),
                )
            }),

            PlanNode::Let { bindings, expr } => {
                // Evaluate bindings in order, remembering anything they
                // shadow so the scope can be unwound afterwards.
                let mut shadowed = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    let bound = eval(&binding.node, ctx, &mut *env).await?;
                    let previous = env.bindings.insert(binding.name.clone(), bound);
                    shadowed.push((binding.name.clone(), previous));
                }
                let result = eval(expr, ctx, &mut *env).await;
                for (name, previous) in shadowed.into_iter().rev() {
                    match previous {
                        Some(value) => env.bindings.insert(name, value),
                        None => env.bindings.remove(&name),
                    };
                }
                result
            }

            PlanNode::Query { sql, params } => run_leaf(ctx, env, sql, params, Leaf::Query).await,
            PlanNode::Execute { sql, params } => {
                run_leaf(ctx, env, sql, params, Leaf::Execute).await
            }

            PlanNode::Concat { parts } => {
                let mut results = Vec::with_capacity(parts.len());
                for part in parts {
                    results.push(eval(part, ctx, &mut *env).await?);
                }
                Ok(value::concat(results))
            }

            PlanNode::Sum { parts } => {
                let mut results = Vec::with_capacity(parts.len());
                for part in parts {
                    results.push(eval(part, ctx, &mut *env).await?);
                }
                value::sum(results)
            }

            PlanNode::Map { records, fields } => {
                let input = eval(records, ctx, &mut *env).await?;
                value::map_rows(input, fields)
            }

            PlanNode::If {
                condition,
                then,
                otherwise,
            } => {
                // The untaken branch is never evaluated.
                let cond = eval(condition, ctx, &mut *env).await?;
                if value::is_truthy(&cond) {
                    eval(then, ctx, &mut *env).await
                } else {
                    eval(otherwise, ctx, &mut *env).await
                }
            }

            PlanNode::Unique { records } => {
                let input = eval(records, ctx, &mut *env).await?;
                value::unique(input)
            }

            PlanNode::Required { records } => {
                let input = eval(records, ctx, &mut *env).await?;
                value::required(input)
            }

            PlanNode::Join { parent, children } => {
                let parent_value = eval(parent, ctx, &mut *env).await?;
                let mut child_values = Vec::with_capacity(children.len());
                for child in children {
                    let value = eval(&child.child, ctx, &mut *env).await?;
                    child_values.push((value, child));
                }
                value::join(parent_value, child_values)
            }
        }
    })
}

#[derive(Clone, Copy)]
enum Leaf {
    Query,
    Execute,
}

/// Run one leaf statement and report it to the observer.
async fn run_leaf(
    ctx: &ExecutionContext<'_>,
    env: &Env<'_>,
    sql: &str,
    params: &[SqlParam],
    leaf: Leaf,
) -> Result<Value, InterpretError> {
    let resolved = resolve_params(params, env)?;

    let started = Instant::now();
    let outcome = async {
        match leaf {
            Leaf::Query => ctx
                .queryable
                .query(sql, resolved.clone())
                .await
                .map(|rows| Value::Array(rows.into_iter().map(Value::Object).collect())),
            Leaf::Execute => ctx
                .queryable
                .execute(sql, resolved.clone())
                .await
                .map(Value::from),
        }
    }
    .instrument(info_span!(
        "Execute statement",
        target = ctx.target.as_str()
    ))
    .await;
    let duration = started.elapsed();

    // Pass-through only: observers cannot influence control flow.
    if let Some(observer) = &ctx.observer {
        observer.on_query(QueryEvent {
            sql: sql.to_string(),
            params: resolved,
            duration,
            target: ctx.target,
        });
    }

    Ok(outcome?)
}

/// Resolve positional parameters against the environment.
fn resolve_params(params: &[SqlParam], env: &Env<'_>) -> Result<Vec<Value>, InterpretError> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Value(value) => Ok(value.clone()),
            SqlParam::Placeholder(name) => env.get(name).cloned().ok_or_else(|| {
                InterpretError::known(
                    codes::MISSING_PLACEHOLDER,
                    format!("placeholder '{name}' was not supplied"),
                )
            }),
        })
        .collect()
}
