//! The transaction registry and its watchdogs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use request_engine_adapters::{DriverAdapter, Queryable, ResultSet, Transaction};
use request_engine_errors::{
    classify_driver_error, DriverError, RequestError, TransactionError,
};

use crate::{TransactionOptions, TransactionStatus, TxId};

/// Terminal statuses remembered after eviction, so a late commit/rollback
/// can be answered with AlreadyClosed instead of NotFound.
const CLOSED_CAPACITY: usize = 1024;

/// Owns the registry of interactive transactions.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn DriverAdapter>,
    /// One permit per concurrently running transaction.
    slots: Arc<Semaphore>,
    capacity: usize,
    registry: Mutex<HashMap<TxId, Entry>>,
    closed: Mutex<ClosedSet>,
}

struct Entry {
    status: TransactionStatus,
    shared: Arc<TxShared>,
    watchdog: Option<JoinHandle<()>>,
    _permit: OwnedSemaphorePermit,
}

/// The transaction's connection, shared between the registry, the caller's
/// handle and the watchdog. The mutex serializes statements; `None` means
/// the connection has been consumed by commit/rollback.
struct TxShared {
    conn: Mutex<Option<Box<dyn Transaction>>>,
}

/// The queryable a caller gets back from [`TransactionManager::get`].
#[derive(Clone)]
pub struct TransactionHandle {
    shared: Arc<TxShared>,
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle").finish_non_exhaustive()
    }
}

#[async_trait]
impl Queryable for TransactionHandle {
    async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        let guard = self.shared.conn.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.query(sql, params).await,
            None => Err(DriverError::connection_closed(
                "transaction connection already released",
            )),
        }
    }

    async fn execute(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError> {
        let guard = self.shared.conn.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.execute(sql, params).await,
            None => Err(DriverError::connection_closed(
                "transaction connection already released",
            )),
        }
    }
}

impl TransactionManager {
    /// `max_concurrent` bounds the number of simultaneously running
    /// transactions; further starts wait up to their `max_wait`.
    pub fn new(adapter: Arc<dyn DriverAdapter>, max_concurrent: usize) -> Self {
        TransactionManager {
            inner: Arc::new(Inner {
                adapter,
                slots: Arc::new(Semaphore::new(max_concurrent)),
                capacity: max_concurrent,
                registry: Mutex::new(HashMap::new()),
                closed: Mutex::new(ClosedSet::new(CLOSED_CAPACITY)),
            }),
        }
    }

    /// Begin an interactive transaction.
    ///
    /// The isolation level is validated against the provider before any
    /// connection is acquired; a slot is then awaited for at most
    /// `max_wait`, and only then does the native begin run.
    pub async fn start(&self, options: TransactionOptions) -> Result<TxId, RequestError> {
        if let Some(level) = options.isolation_level {
            let info = self.inner.adapter.connection_info();
            if !info.provider.supports_isolation_level(level) {
                return Err(RequestError::UnsupportedOperation(format!(
                    "isolation level {level} is not supported by provider {}",
                    info.provider
                )));
            }
        }

        let max_wait_ms = u64::try_from(options.max_wait.as_millis()).unwrap_or(u64::MAX);
        let permit = tokio::time::timeout(
            options.max_wait,
            Arc::clone(&self.inner.slots).acquire_owned(),
        )
        .await
        .map_err(|_| TransactionError::Busy { max_wait_ms })?
        .map_err(|_| RequestError::Unknown {
            message: "transaction slots are no longer available".to_string(),
            trace: None,
        })?;

        let id = TxId::new();
        let shared = Arc::new(TxShared {
            conn: Mutex::new(None),
        });
        let deadline = Instant::now() + options.timeout;

        // Register before the native begin so a concurrent shutdown sees
        // this transaction too.
        {
            let mut registry = self.inner.registry.lock().await;
            registry.insert(
                id,
                Entry {
                    status: TransactionStatus::Pending,
                    shared: Arc::clone(&shared),
                    watchdog: None,
                    _permit: permit,
                },
            );
        }

        let begin = self
            .inner
            .adapter
            .start_transaction(options.isolation_level)
            .instrument(info_span!("Begin transaction", %id))
            .await;

        let tx = match begin {
            Ok(tx) => tx,
            Err(err) => {
                self.inner.registry.lock().await.remove(&id);
                return Err(classify_driver_error(&err));
            }
        };

        *shared.conn.lock().await = Some(tx);

        let mut registry = self.inner.registry.lock().await;
        match registry.get_mut(&id) {
            Some(entry) => {
                entry.status = TransactionStatus::Running;
                entry.watchdog = Some(spawn_watchdog(Arc::clone(&self.inner), id, deadline));
            }
            None => {
                // Shutdown raced the begin; undo it.
                drop(registry);
                if let Some(tx) = shared.conn.lock().await.take() {
                    let _ = tx.rollback().await;
                }
                return Err(TransactionError::AlreadyClosed {
                    status: TransactionStatus::RolledBack.to_string(),
                }
                .into());
            }
        }
        drop(registry);

        tracing::debug!(%id, timeout_ms = ?options.timeout.as_millis(), "transaction started");
        Ok(id)
    }

    /// The bound queryable for a running transaction.
    pub async fn get(&self, id: TxId) -> Result<TransactionHandle, RequestError> {
        let registry = self.inner.registry.lock().await;
        match registry.get(&id) {
            Some(entry) if entry.status == TransactionStatus::Running => Ok(TransactionHandle {
                shared: Arc::clone(&entry.shared),
            }),
            Some(_) | None => {
                drop(registry);
                Err(self.closed_error(id).await.into())
            }
        }
    }

    pub async fn commit(&self, id: TxId) -> Result<(), RequestError> {
        self.close(id, TransactionStatus::Committed).await
    }

    pub async fn rollback(&self, id: TxId) -> Result<(), RequestError> {
        self.close(id, TransactionStatus::RolledBack).await
    }

    /// Shutdown path: roll back every running transaction and release the
    /// connections. Later lookups on the ids report the closure.
    pub async fn cancel_all(&self) {
        let drained: Vec<(TxId, Entry)> = {
            let mut registry = self.inner.registry.lock().await;
            let drained: Vec<(TxId, Entry)> = registry.drain().collect();
            let mut closed = self.inner.closed.lock().await;
            for (id, _) in &drained {
                closed.insert(*id, TransactionStatus::RolledBack);
            }
            drained
        };
        for (id, entry) in drained {
            if let Some(watchdog) = &entry.watchdog {
                watchdog.abort();
            }
            if let Some(tx) = entry.shared.conn.lock().await.take() {
                if let Err(err) = tx.rollback().await {
                    tracing::error!(%id, "rollback during shutdown failed: {err}");
                }
            }
            tracing::debug!(%id, "transaction cancelled during shutdown");
        }
    }

    /// Number of currently running transactions.
    pub async fn running_count(&self) -> usize {
        self.inner.capacity - self.inner.slots.available_permits()
    }

    async fn close(&self, id: TxId, target: TransactionStatus) -> Result<(), RequestError> {
        // Record the terminal status while the registry lock is held, so
        // no lookup can land between removal and the closed record.
        let entry = {
            let mut registry = self.inner.registry.lock().await;
            match registry.remove(&id) {
                Some(entry) => {
                    self.inner.closed.lock().await.insert(id, target);
                    Some(entry)
                }
                None => None,
            }
        };
        let Some(entry) = entry else {
            return Err(self.closed_error(id).await.into());
        };

        if let Some(watchdog) = &entry.watchdog {
            watchdog.abort();
        }

        let tx = entry.shared.conn.lock().await.take();
        let result = match (tx, target) {
            (Some(tx), TransactionStatus::Committed) => tx.commit().await,
            (Some(tx), _) => tx.rollback().await,
            // Registered but never began; nothing to release.
            (None, _) => Ok(()),
        };
        // The permit is released when `entry` drops, after the connection
        // has actually been returned.
        drop(entry);

        tracing::debug!(%id, status = %target, "transaction closed");
        result.map_err(|err| classify_driver_error(&err))
    }

    async fn closed_error(&self, id: TxId) -> TransactionError {
        match self.inner.closed.lock().await.get(id) {
            Some(status) => TransactionError::AlreadyClosed {
                status: status.to_string(),
            },
            None => TransactionError::NotFound { id: id.to_string() },
        }
    }
}

/// Arm the timeout watchdog for one transaction.
///
/// On expiry the transaction is rolled back, marked timed out and its
/// connection released, regardless of what the caller is doing. A clean
/// close aborts the task instead.
fn spawn_watchdog(inner: Arc<Inner>, id: TxId, deadline: Instant) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;

        // The terminal status is recorded while the registry lock is
        // held: a concurrent lookup sees either the live entry or the
        // closed record, never neither.
        let entry = {
            let mut registry = inner.registry.lock().await;
            let Some(entry) = registry.remove(&id) else {
                return;
            };
            inner
                .closed
                .lock()
                .await
                .insert(id, TransactionStatus::TimedOut);
            entry
        };
        if let Some(tx) = entry.shared.conn.lock().await.take() {
            if let Err(err) = tx.rollback().await {
                tracing::error!(%id, "rollback of timed out transaction failed: {err}");
            }
        }
        tracing::warn!(%id, "transaction timed out and was rolled back");
    })
}

/// Bounded memory of terminal statuses, evicting oldest first.
struct ClosedSet {
    capacity: usize,
    order: VecDeque<TxId>,
    statuses: HashMap<TxId, TransactionStatus>,
}

impl ClosedSet {
    fn new(capacity: usize) -> Self {
        ClosedSet {
            capacity,
            order: VecDeque::new(),
            statuses: HashMap::new(),
        }
    }

    fn insert(&mut self, id: TxId, status: TransactionStatus) {
        if self.statuses.insert(id, status).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
    }

    fn get(&self, id: TxId) -> Option<TransactionStatus> {
        self.statuses.get(&id).copied()
    }
}
