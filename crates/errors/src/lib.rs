//! The error taxonomy shared across the engine.
//!
//! Raw failures from the driver boundary are classified here into a stable
//! set of user-visible kinds. Classification is pure: it never touches
//! global state and is safe to call concurrently.

pub mod codes;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw failure from the driver-adapter boundary, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct DriverError {
    /// A stable machine-readable code (for databases, typically the
    /// SQLSTATE), when the driver can supply one.
    pub code: Option<String>,
    pub message: String,
    pub kind: DriverErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverErrorKind {
    /// The physical connection is gone; nothing further can run on it.
    ConnectionClosed,
    /// A fatal fault in the driver or engine boundary.
    Fatal,
    /// An ordinary statement-level failure.
    Other,
}

impl DriverError {
    pub fn connection_closed(message: impl Into<String>) -> Self {
        DriverError {
            code: None,
            message: message.into(),
            kind: DriverErrorKind::ConnectionClosed,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        DriverError {
            code: None,
            message: message.into(),
            kind: DriverErrorKind::Fatal,
        }
    }

    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        DriverError {
            code,
            message: message.into(),
            kind: DriverErrorKind::Other,
        }
    }

    /// Infrastructure failures abort a whole batch; ordinary failures are
    /// isolated to the slot that produced them.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::ConnectionClosed | DriverErrorKind::Fatal
        )
    }
}

/// A failure of the transaction manager, scoped to one transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("no transaction slot became free within {max_wait_ms}ms")]
    Busy { max_wait_ms: u64 },
    #[error("transaction timed out and was rolled back")]
    TimedOut,
    #[error("transaction is already closed: {status}")]
    AlreadyClosed { status: String },
    #[error("transaction not found: {id}")]
    NotFound { id: String },
}

/// The public error taxonomy.
///
/// Known errors expose a stable code for programmatic handling; crash and
/// unknown errors degrade to a generic failure while preserving their
/// diagnostic text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// Bad configuration or missing adapter; fatal at startup.
    #[error("initialization failed: {0}")]
    Initialization(String),
    /// Fatal fault in the interpreter or compiler boundary.
    #[error("engine crashed: {message}")]
    EngineCrash { message: String },
    /// Domain-classified failure with a stable machine-readable code.
    #[error("{code}: {message}")]
    Known {
        code: String,
        message: String,
        meta: Option<serde_json::Value>,
    },
    /// An opaque failure; message and trace are preserved for diagnosis.
    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        trace: Option<String>,
    },
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// The active provider cannot perform the requested operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Operations deliberately outside this core, e.g. metrics reporting.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl RequestError {
    pub fn known(code: &str, message: impl Into<String>) -> Self {
        RequestError::Known {
            code: code.to_string(),
            message: message.into(),
            meta: None,
        }
    }

    pub fn record_not_found(message: impl Into<String>) -> Self {
        RequestError::known(codes::RECORD_NOT_FOUND, message)
    }

    pub fn ambiguous_result(message: impl Into<String>) -> Self {
        RequestError::known(codes::AMBIGUOUS_RESULT, message)
    }

    /// The stable code, for `Known` errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            RequestError::Known { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Classify a raw boundary failure into the public taxonomy.
///
/// A stable code plus message becomes a known error; a fatal-crash marker
/// becomes an engine crash; anything else stays opaque.
pub fn classify_driver_error(err: &DriverError) -> RequestError {
    match (&err.kind, &err.code) {
        (DriverErrorKind::Fatal, _) => RequestError::EngineCrash {
            message: err.message.clone(),
        },
        (_, Some(code)) => RequestError::Known {
            code: code.clone(),
            message: err.message.clone(),
            meta: None,
        },
        (_, None) => RequestError::Unknown {
            message: err.message.clone(),
            trace: None,
        },
    }
}
