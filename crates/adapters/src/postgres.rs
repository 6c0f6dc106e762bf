//! A sqlx-backed PostgreSQL driver adapter.
//!
//! This is the reference adapter: one primary pool, an optional read
//! replica, and native transactions taken from the primary pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use thiserror::Error;
use tokio::sync::Mutex;

use request_engine_errors::DriverError;

use crate::isolation::{ConnectionInfo, IsolationLevel, Provider};
use crate::queryable::{DriverAdapter, Queryable, ResultSet, Transaction};

/// Pool and connection settings for the Postgres adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresSettings {
    pub connection_string: String,
    /// When set, pure-read work outside explicit transactions may be
    /// routed here.
    #[serde(default)]
    pub replica_connection_string: Option<String>,
    #[serde(default = "max_connections_default")]
    pub max_connections: u32,
    #[serde(default = "acquire_timeout_default")]
    pub acquire_timeout_seconds: u64,
}

fn max_connections_default() -> u32 {
    10
}

fn acquire_timeout_default() -> u64 {
    30
}

/// Adapter construction error, fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(#[from] url::ParseError),
    #[error("unsupported connection scheme: {0}")]
    UnsupportedScheme(String),
    #[error("unable to initialize connection pool: {0}")]
    UnableToCreatePool(#[from] sqlx::Error),
}

/// The primary adapter: owns the pool(s) and hands out transactions.
pub struct PostgresAdapter {
    pool: PgPool,
    reader: Option<Arc<ReplicaReader>>,
}

impl PostgresAdapter {
    /// Validate the settings and connect both pools.
    pub async fn connect(settings: &PostgresSettings) -> Result<Self, ConfigurationError> {
        let pool = create_pool(&settings.connection_string, settings).await?;
        let reader = match &settings.replica_connection_string {
            None => None,
            Some(uri) => {
                let replica_pool = create_pool(uri, settings).await?;
                Some(Arc::new(ReplicaReader { pool: replica_pool }))
            }
        };
        Ok(PostgresAdapter { pool, reader })
    }
}

async fn create_pool(uri: &str, settings: &PostgresSettings) -> Result<PgPool, ConfigurationError> {
    let parsed = url::Url::parse(uri)?;
    match parsed.scheme() {
        "postgres" | "postgresql" => {}
        other => return Err(ConfigurationError::UnsupportedScheme(other.to_string())),
    }
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_seconds))
        .connect_lazy(uri)?;
    Ok(pool)
}

#[async_trait]
impl Queryable for PostgresAdapter {
    async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DriverAdapter for PostgresAdapter {
    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            provider: Provider::Postgres,
            supports_relation_joins: true,
            max_bind_values: Some(65535),
        }
    }

    async fn start_transaction(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<Box<dyn Transaction>, DriverError> {
        let mut tx = self.pool.begin().await.map_err(from_sqlx)?;
        if let Some(level) = isolation {
            // Must be the first statement of the transaction.
            let set = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
            sqlx::query(&set)
                .execute(&mut *tx)
                .await
                .map_err(from_sqlx)?;
        }
        Ok(Box::new(PgTransaction {
            inner: Mutex::new(tx),
        }))
    }

    fn reader(&self) -> Option<Arc<dyn Queryable>> {
        self.reader
            .as_ref()
            .map(|r| Arc::clone(r) as Arc<dyn Queryable>)
    }

    async fn dispose(&self) -> Result<(), DriverError> {
        self.pool.close().await;
        if let Some(reader) = &self.reader {
            reader.pool.close().await;
        }
        Ok(())
    }
}

/// The read-replica side of the adapter. Queries only.
struct ReplicaReader {
    pool: PgPool,
}

#[async_trait]
impl Queryable for ReplicaReader {
    async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&self, sql: &str, _params: Vec<serde_json::Value>) -> Result<u64, DriverError> {
        Err(DriverError::new(
            None,
            format!("refusing to execute a write on the read replica: {sql}"),
        ))
    }
}

/// A native transaction. The mutex serializes statements so that
/// submission order is execution order on the one underlying connection.
struct PgTransaction {
    inner: Mutex<sqlx::Transaction<'static, sqlx::Postgres>>,
}

#[async_trait]
impl Queryable for PgTransaction {
    async fn query(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<ResultSet, DriverError> {
        let mut tx = self.inner.lock().await;
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await
            .map_err(from_sqlx)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(
        &self,
        sql: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<u64, DriverError> {
        let mut tx = self.inner.lock().await;
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await
            .map_err(from_sqlx)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<(), DriverError> {
        self.inner.into_inner().commit().await.map_err(from_sqlx)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        self.inner.into_inner().rollback().await.map_err(from_sqlx)
    }
}

type PgQuery<'a> = sqlx::query::Query<'a, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind positional JSON parameters to a sqlx query.
fn bind_params(query: PgQuery<'_>, params: Vec<serde_json::Value>) -> PgQuery<'_> {
    params.into_iter().fold(query, |query, param| match param {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        serde_json::Value::String(s) => query.bind(s),
        // Arrays and objects travel as jsonb.
        composite => query.bind(composite),
    })
}

/// Decode a row into a JSON object, column by column.
fn row_to_json(row: &PgRow) -> Result<serde_json::Map<String, serde_json::Value>, DriverError> {
    let mut record = serde_json::Map::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .map(|v| v.map_or(serde_json::Value::Null, serde_json::Value::Bool)),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)
                .map(|v| v.map_or(serde_json::Value::Null, |i| i.into())),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)
                .map(|v| v.map_or(serde_json::Value::Null, |i| i.into())),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)
                .map(|v| v.map_or(serde_json::Value::Null, |i| i.into())),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .map(|v| json_number(v.map(f64::from))),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(json_number),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(index)
                .map(|v| v.unwrap_or(serde_json::Value::Null)),
            "UUID" => row
                .try_get::<Option<sqlx::types::Uuid>, _>(index)
                .map(|v| {
                    v.map_or(serde_json::Value::Null, |u| {
                        serde_json::Value::String(u.to_string())
                    })
                }),
            _ => row.try_get::<Option<String>, _>(index).map(|v| {
                v.map_or(serde_json::Value::Null, serde_json::Value::String)
            }),
        }
        .map_err(from_sqlx)?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn json_number(value: Option<f64>) -> serde_json::Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Map a sqlx failure into the raw boundary error shape.
fn from_sqlx(err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string());
            match code.as_deref() {
                // Class XX: internal error. The backend is in an unknown
                // state; treat as a crash.
                Some(c) if c.starts_with("XX") => DriverError::fatal(db.message()),
                // Class 57: operator intervention (shutdown, crash).
                Some(c) if c.starts_with("57") => DriverError::connection_closed(db.message()),
                _ => DriverError::new(code, db.message()),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Protocol(_) => {
            DriverError::connection_closed(err.to_string())
        }
        other => DriverError::new(None, other.to_string()),
    }
}
