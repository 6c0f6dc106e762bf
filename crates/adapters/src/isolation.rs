//! Provider vocabulary: isolation levels and connection metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The database flavour behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provider {
    Postgres,
    Mysql,
    Sqlite,
    SqlServer,
}

impl Provider {
    /// The fixed support table mapping requested isolation levels to what
    /// the provider can actually do.
    pub fn supports_isolation_level(self, level: IsolationLevel) -> bool {
        match self {
            // SQLite transactions are always serializable.
            Provider::Sqlite => level == IsolationLevel::Serializable,
            Provider::Postgres | Provider::Mysql => level != IsolationLevel::Snapshot,
            Provider::SqlServer => true,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Postgres => "postgres",
            Provider::Mysql => "mysql",
            Provider::Sqlite => "sqlite",
            Provider::SqlServer => "sqlserver",
        };
        write!(f, "{name}")
    }
}

/// The consistency guarantee requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    /// The provider-native `SET TRANSACTION ISOLATION LEVEL` vocabulary.
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "readuncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "readcommitted" => Ok(IsolationLevel::ReadCommitted),
            "repeatableread" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            _ => Err(format!("unknown isolation level: {s}")),
        }
    }
}

/// Metadata about the active connection, reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub provider: Provider,
    /// Whether the database can perform relation joins itself, as opposed
    /// to the interpreter joining in memory.
    pub supports_relation_joins: bool,
    /// Upper bound on bind parameters per statement, when the provider has
    /// one.
    pub max_bind_values: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sql_server_only() {
        assert!(Provider::SqlServer.supports_isolation_level(IsolationLevel::Snapshot));
        for provider in [Provider::Postgres, Provider::Mysql, Provider::Sqlite] {
            assert!(!provider.supports_isolation_level(IsolationLevel::Snapshot));
        }
    }

    #[test]
    fn sqlite_only_serializes() {
        assert!(Provider::Sqlite.supports_isolation_level(IsolationLevel::Serializable));
        assert!(!Provider::Sqlite.supports_isolation_level(IsolationLevel::ReadCommitted));
    }

    #[test]
    fn parses_the_request_vocabulary() {
        assert_eq!(
            "ReadCommitted".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "REPEATABLE READ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert!("Chaos".parse::<IsolationLevel>().is_err());
    }
}
