//! A scripted in-memory driver adapter for tests.
//!
//! Responses are keyed by exact SQL text; everything the engine runs is
//! recorded so tests can assert on statement order, routing and
//! transaction lifecycles without a real database.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use request_engine_adapters::{
    ConnectionInfo, DriverAdapter, IsolationLevel, Provider, Queryable, ResultSet, Transaction,
};
use request_engine_errors::DriverError;

/// One statement the driver saw, with the context it ran in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub sql: String,
    /// `autocommit`, `replica`, or `tx-N` for the N-th transaction.
    pub context: String,
}

#[derive(Debug, Clone)]
enum Outcome {
    Rows(ResultSet),
    Affected(u64),
    Error(DriverError),
}

#[derive(Default)]
struct State {
    scripts: Mutex<HashMap<String, Outcome>>,
    log: Mutex<Vec<ExecutedStatement>>,
    begin_failures: Mutex<VecDeque<DriverError>>,
    tx_counter: AtomicUsize,
    open_transactions: AtomicUsize,
}

impl State {
    fn record(&self, sql: &str, context: &str) {
        self.log
            .lock()
            .expect("statement log poisoned")
            .push(ExecutedStatement {
                sql: sql.to_string(),
                context: context.to_string(),
            });
    }

    fn outcome_for(&self, sql: &str) -> Option<Outcome> {
        self.scripts
            .lock()
            .expect("scripts poisoned")
            .get(sql)
            .cloned()
    }
}

/// The scripted adapter. Clones share all state.
#[derive(Clone)]
pub struct TestDriver {
    state: Arc<State>,
    provider: Provider,
    reader: bool,
}

impl Default for TestDriver {
    fn default() -> Self {
        TestDriver::new()
    }
}

impl TestDriver {
    pub fn new() -> Self {
        TestDriver {
            state: Arc::new(State::default()),
            provider: Provider::Postgres,
            reader: false,
        }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    /// Expose a read replica sharing the same scripts.
    pub fn with_reader(mut self) -> Self {
        self.reader = true;
        self
    }

    /// Script a rowset response; `rows` must be a JSON array of objects.
    pub fn respond_with_rows(&self, sql: &str, rows: serde_json::Value) {
        let rows = rows
            .as_array()
            .expect("scripted rows must be a JSON array")
            .iter()
            .map(|row| {
                row.as_object()
                    .expect("scripted rows must be JSON objects")
                    .clone()
            })
            .collect();
        self.script(sql, Outcome::Rows(rows));
    }

    pub fn respond_with_affected(&self, sql: &str, affected: u64) {
        self.script(sql, Outcome::Affected(affected));
    }

    pub fn respond_with_error(&self, sql: &str, error: DriverError) {
        self.script(sql, Outcome::Error(error));
    }

    /// Make the next native begin fail.
    pub fn fail_next_begin(&self, error: DriverError) {
        self.state
            .begin_failures
            .lock()
            .expect("begin failures poisoned")
            .push_back(error);
    }

    /// Everything executed so far, in submission order.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.log.lock().expect("statement log poisoned").clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed().into_iter().map(|s| s.sql).collect()
    }

    /// Transactions begun but not yet committed or rolled back.
    pub fn open_transaction_count(&self) -> usize {
        self.state.open_transactions.load(Ordering::SeqCst)
    }

    fn script(&self, sql: &str, outcome: Outcome) {
        self.state
            .scripts
            .lock()
            .expect("scripts poisoned")
            .insert(sql.to_string(), outcome);
    }
}

fn run_query(state: &State, sql: &str, context: &str) -> Result<ResultSet, DriverError> {
    state.record(sql, context);
    match state.outcome_for(sql) {
        Some(Outcome::Rows(rows)) => Ok(rows),
        Some(Outcome::Affected(_)) => Ok(vec![]),
        Some(Outcome::Error(err)) => Err(err),
        None => Ok(vec![]),
    }
}

fn run_execute(state: &State, sql: &str, context: &str) -> Result<u64, DriverError> {
    state.record(sql, context);
    match state.outcome_for(sql) {
        Some(Outcome::Affected(count)) => Ok(count),
        Some(Outcome::Rows(rows)) => Ok(rows.len() as u64),
        Some(Outcome::Error(err)) => Err(err),
        None => Ok(0),
    }
}

#[async_trait]
impl Queryable for TestDriver {
    async fn query(
        &self,
        sql: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        run_query(&self.state, sql, "autocommit")
    }

    async fn execute(
        &self,
        sql: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError> {
        run_execute(&self.state, sql, "autocommit")
    }
}

#[async_trait]
impl DriverAdapter for TestDriver {
    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            provider: self.provider,
            supports_relation_joins: false,
            max_bind_values: None,
        }
    }

    async fn start_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>, DriverError> {
        if let Some(err) = self
            .state
            .begin_failures
            .lock()
            .expect("begin failures poisoned")
            .pop_front()
        {
            return Err(err);
        }
        let number = self.state.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let context = format!("tx-{number}");
        match isolation {
            Some(level) => self
                .state
                .record(&format!("BEGIN ISOLATION LEVEL {level}"), &context),
            None => self.state.record("BEGIN", &context),
        }
        self.state.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestTransaction {
            state: Arc::clone(&self.state),
            context,
        }))
    }

    fn reader(&self) -> Option<Arc<dyn Queryable>> {
        if self.reader {
            Some(Arc::new(TestReader {
                state: Arc::clone(&self.state),
            }))
        } else {
            None
        }
    }

    async fn dispose(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

struct TestReader {
    state: Arc<State>,
}

#[async_trait]
impl Queryable for TestReader {
    async fn query(
        &self,
        sql: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        run_query(&self.state, sql, "replica")
    }

    async fn execute(
        &self,
        sql: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError> {
        run_execute(&self.state, sql, "replica")
    }
}

struct TestTransaction {
    state: Arc<State>,
    context: String,
}

#[async_trait]
impl Queryable for TestTransaction {
    async fn query(
        &self,
        sql: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        run_query(&self.state, sql, &self.context)
    }

    async fn execute(
        &self,
        sql: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError> {
        run_execute(&self.state, sql, &self.context)
    }
}

#[async_trait]
impl Transaction for TestTransaction {
    async fn commit(self: Box<Self>) -> Result<(), DriverError> {
        self.state.record("COMMIT", &self.context);
        self.state.open_transactions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        self.state.record("ROLLBACK", &self.context);
        self.state.open_transactions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
