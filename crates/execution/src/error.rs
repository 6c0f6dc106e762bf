//! Interpreter-level errors.
//!
//! Leaf failures keep their raw driver shape here so the batch executor
//! can apply its mode-specific policy before anything is classified into
//! the public taxonomy.

use thiserror::Error;

use request_engine_errors::{classify_driver_error, DriverError, RequestError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpretError {
    /// A raw boundary failure, bubbled unmodified from a leaf statement.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// A failure produced by the plan semantics themselves, e.g. a
    /// `Required` node over an empty rowset.
    #[error("{code}: {message}")]
    Known {
        code: &'static str,
        message: String,
    },
}

impl InterpretError {
    pub fn known(code: &'static str, message: impl Into<String>) -> Self {
        InterpretError::Known {
            code,
            message: message.into(),
        }
    }

    /// Whether this failure poisons the whole connection rather than just
    /// the statement that produced it.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            InterpretError::Driver(err) => err.is_infrastructure(),
            InterpretError::Known { .. } => false,
        }
    }

    /// Classify into the public taxonomy.
    pub fn into_request_error(self) -> RequestError {
        match self {
            InterpretError::Driver(err) => classify_driver_error(&err),
            InterpretError::Known { code, message } => RequestError::known(code, message),
        }
    }
}
