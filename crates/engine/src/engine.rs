//! The public engine surface.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info_span, Instrument};

use request_engine_adapters::{DriverAdapter, IsolationLevel, Queryable};
use request_engine_errors::{classify_driver_error, RequestError};
use request_engine_execution::{
    execute_batch, interpret, ExecutionContext, InterpretError, QueryObserver, QueryTarget,
};
use request_engine_plan::{BatchPlan, PlaceholderValues, PlanNode};
use request_engine_transaction::{TransactionManager, TransactionOptions, TxId};

use crate::config::EngineConfig;

/// Per-request options.
#[derive(Default)]
pub struct RequestOptions {
    pub placeholders: PlaceholderValues,
    /// Scope the request to a running interactive transaction.
    pub transaction_id: Option<TxId>,
}

/// Caller-facing `startTransaction` options; unset fields fall back to
/// the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub isolation_level: Option<String>,
    pub max_wait_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// Executes plans and coordinates transactions for one driver adapter.
pub struct RequestEngine {
    adapter: Arc<dyn DriverAdapter>,
    transactions: TransactionManager,
    observer: Option<Arc<dyn QueryObserver>>,
    config: EngineConfig,
}

impl std::fmt::Debug for RequestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestEngine {
    /// Wire an engine to its adapter. Fails fast on a configuration that
    /// could never serve requests.
    pub fn new(adapter: Arc<dyn DriverAdapter>, config: EngineConfig) -> Result<Self, RequestError> {
        if config.max_concurrent_transactions == 0 {
            return Err(RequestError::Initialization(
                "maxConcurrentTransactions must be at least 1".to_string(),
            ));
        }
        let transactions =
            TransactionManager::new(Arc::clone(&adapter), config.max_concurrent_transactions);
        Ok(RequestEngine {
            adapter,
            transactions,
            observer: None,
            config,
        })
    }

    /// Install the per-statement observability hook.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Execute a single plan.
    ///
    /// Inside an explicit transaction the plan always uses that
    /// transaction's connection; outside one, a pure-read plan may be
    /// routed to the read replica when the adapter has one.
    pub async fn request(
        &self,
        plan: &PlanNode,
        options: &RequestOptions,
    ) -> Result<Value, RequestError> {
        match options.transaction_id {
            Some(id) => {
                let handle = self.transactions.get(id).await?;
                let ctx = ExecutionContext::new(&handle, QueryTarget::Transaction)
                    .with_observer(self.observer.clone());
                interpret(plan, &ctx, &options.placeholders)
                    .instrument(info_span!("Request", transaction = %id))
                    .await
                    .map_err(InterpretError::into_request_error)
            }
            None => {
                let reader = if plan.is_read_only() {
                    self.adapter.reader()
                } else {
                    None
                };
                let (queryable, target): (&dyn Queryable, QueryTarget) = match &reader {
                    Some(replica) => (replica.as_ref(), QueryTarget::ReadReplica),
                    None => (&*self.adapter, QueryTarget::Primary),
                };
                let ctx =
                    ExecutionContext::new(queryable, target).with_observer(self.observer.clone());
                interpret(plan, &ctx, &options.placeholders)
                    .instrument(info_span!("Request", target = target.as_str()))
                    .await
                    .map_err(InterpretError::into_request_error)
            }
        }
    }

    /// Execute a batch, yielding one result per original request.
    ///
    /// When the batch is not scoped to an interactive transaction, an
    /// implicit one wraps it: committed on success (business failures in
    /// individual slots included), rolled back on an infrastructure
    /// failure.
    pub async fn request_batch(
        &self,
        batch: &BatchPlan,
        options: &RequestOptions,
    ) -> Result<Vec<Result<Value, RequestError>>, RequestError> {
        match options.transaction_id {
            Some(id) => {
                let handle = self.transactions.get(id).await?;
                let ctx = ExecutionContext::new(&handle, QueryTarget::Transaction)
                    .with_observer(self.observer.clone());
                execute_batch(batch, &ctx, &options.placeholders)
                    .instrument(info_span!("Request batch", transaction = %id))
                    .await
            }
            None => {
                let tx = self
                    .adapter
                    .start_transaction(None)
                    .await
                    .map_err(|err| classify_driver_error(&err))?;
                let result = {
                    let ctx = ExecutionContext::new(&*tx, QueryTarget::Transaction)
                        .with_observer(self.observer.clone());
                    execute_batch(batch, &ctx, &options.placeholders)
                        .instrument(info_span!("Request batch", implicit = true))
                        .await
                };
                match result {
                    Ok(slots) => {
                        tx.commit().await.map_err(|err| classify_driver_error(&err))?;
                        Ok(slots)
                    }
                    Err(err) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            tracing::error!(
                                "rollback of implicit batch transaction failed: {rollback_err}"
                            );
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    /// Begin an interactive transaction and return its id.
    pub async fn start_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TxId, RequestError> {
        let isolation_level = match &request.isolation_level {
            None => None,
            Some(raw) => Some(
                IsolationLevel::from_str(raw)
                    .map_err(RequestError::UnsupportedOperation)?,
            ),
        };
        let defaults = self.config.transaction_options();
        let options = TransactionOptions {
            isolation_level,
            max_wait: request
                .max_wait_ms
                .map_or(defaults.max_wait, Duration::from_millis),
            timeout: request
                .timeout_ms
                .map_or(defaults.timeout, Duration::from_millis),
        };
        self.transactions.start(options).await
    }

    pub async fn commit_transaction(&self, id: TxId) -> Result<(), RequestError> {
        self.transactions.commit(id).await
    }

    pub async fn rollback_transaction(&self, id: TxId) -> Result<(), RequestError> {
        self.transactions.rollback(id).await
    }

    /// Shutdown path: every running transaction is rolled back and its
    /// connection released.
    pub async fn cancel_all_transactions(&self) {
        self.transactions.cancel_all().await;
    }

    /// Metrics reporting is outside this core.
    pub fn metrics(&self) -> Result<Value, RequestError> {
        Err(RequestError::NotImplemented("metrics reporting"))
    }

    /// Roll back everything still running and release the adapter's
    /// connections.
    pub async fn dispose(&self) -> Result<(), RequestError> {
        self.transactions.cancel_all().await;
        self.adapter
            .dispose()
            .await
            .map_err(|err| classify_driver_error(&err))
    }
}
