//! Core error types
//!
//! Every operation in the workspace returns [`Error`]. The variants mirror the
//! wire error codes exposed by the action facade, so the outermost kind maps
//! directly onto an HTTP status.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Discriminant of [`Error`], stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input or state transition rejected
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Caller is not authenticated
    Unauthorized,
    /// Caller lacks permission
    Forbidden,
    /// Concurrent modification or duplicate
    Conflict,
    /// Transient backend failure (route provider, transport driver)
    OperationFailed,
    /// Persistence or invariant failure
    Internal,
    /// Operation stopped by its cancellation token
    Cancelled,
}

impl ErrorKind {
    /// Wire code used in error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::OperationFailed => "operation_failed",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Core error type for Lifeline
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Input violation or illegal state transition
    #[error("Validation failed: {message}")]
    Validation {
        /// Human-readable reason
        message: String,
        /// Offending input field, when known
        field: Option<String>,
    },

    /// Unknown identifier
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Entity type name
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Stale version or duplicate record
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External collaborator failed or timed out
    #[error("Operation failed ({operation}): {message}")]
    OperationFailed {
        /// Operation that was attempted
        operation: String,
        /// Failure description
        message: String,
    },

    /// Persistence failure or broken invariant
    #[error("Internal error: {message}")]
    Internal {
        /// Failure description
        message: String,
        /// Set when a compensating write failed and an operator must reconcile
        reconcile: bool,
    },

    /// Cancellation token fired before the operation finished
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Validation error without a field
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Validation error naming the offending field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Not-found error for an entity
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict(message.into())
    }

    /// Transient failure of an external call
    pub fn operation_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
            reconcile: false,
        }
    }

    /// Internal error raised when a compensating write failed
    pub fn reconcile(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
            reconcile: true,
        }
    }

    /// Kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::OperationFailed { .. } => ErrorKind::OperationFailed,
            Error::Internal { .. } => ErrorKind::Internal,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Stable wire code
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Check whether this error is of the given kind
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Structured details for the error envelope, if any
    pub fn details(&self) -> Option<Map<String, Value>> {
        let mut details = Map::new();
        match self {
            Error::Validation {
                field: Some(field), ..
            } => {
                details.insert("field".into(), Value::String(field.clone()));
            }
            Error::NotFound { resource, id } => {
                details.insert("resource".into(), Value::String((*resource).to_string()));
                details.insert("id".into(), Value::String(id.clone()));
            }
            Error::OperationFailed { operation, .. } => {
                details.insert("operation".into(), Value::String(operation.clone()));
            }
            Error::Internal {
                reconcile: true, ..
            } => {
                details.insert("reconcile".into(), Value::Bool(true));
            }
            _ => {}
        }
        if details.is_empty() {
            None
        } else {
            Some(details)
        }
    }

    /// Prefix the message with operation or id context; the kind is preserved
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            Error::Validation { message, field } => Error::Validation {
                message: format!("{ctx}: {message}"),
                field,
            },
            Error::Unauthorized(message) => Error::Unauthorized(format!("{ctx}: {message}")),
            Error::Forbidden(message) => Error::Forbidden(format!("{ctx}: {message}")),
            Error::Conflict(message) => Error::Conflict(format!("{ctx}: {message}")),
            Error::OperationFailed { operation, message } => Error::OperationFailed {
                operation,
                message: format!("{ctx}: {message}"),
            },
            Error::Internal { message, reconcile } => Error::Internal {
                message: format!("{ctx}: {message}"),
                reconcile,
            },
            other @ (Error::NotFound { .. } | Error::Cancelled) => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::invalid_field("payload", format!("malformed JSON: {error}"))
    }
}
