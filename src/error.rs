//! Error types
//!
//! Every fallible runtime call returns [`RuntimeError`]. The variants keep the
//! distinction callers care about: a payload that could not be decoded, a
//! transport failure, an operation the server reported as failed, and a caller
//! cancellation.

use crate::operation::{CloudError, OperationStatus};
use crate::transport::TransportError;
use thiserror::Error;

/// Result alias used across the runtime
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// A payload did not match the shape it was decoded into (or encoded from).
#[derive(Debug, Error)]
#[error("failed to decode {type_name} at `{path}`: {source}")]
pub struct DecodeError {
    /// Rust type the payload was decoded into
    pub type_name: &'static str,
    /// JSON path of the offending value, `$` being the document root
    pub path: String,
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    pub fn new(type_name: &'static str, path: impl Into<String>, source: serde_json::Error) -> Self {
        Self {
            type_name,
            path: path.into(),
            source,
        }
    }

    /// Build an error from a message rather than a parser failure
    pub fn custom(type_name: &'static str, path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::new(
            type_name,
            path,
            <serde_json::Error as serde::de::Error>::custom(message),
        )
    }

    /// Re-root the error path under `prefix` (e.g. `$[3]`)
    pub(crate) fn nested(mut self, prefix: &str) -> Self {
        self.path = format!("{}{}", prefix, self.path.trim_start_matches('$'));
        self
    }
}

/// The server reported a terminal failure for a long-running operation.
#[derive(Debug, Error)]
#[error("operation `{operation}` {status}: {summary}")]
pub struct OperationFailedError {
    pub operation: String,
    /// Either `Failed` or `Canceled`
    pub status: OperationStatus,
    /// Structured `error` object reported by the server, if any
    pub error: Option<CloudError>,
    /// Raw body of the response that carried the terminal status
    pub body: Option<serde_json::Value>,
    summary: String,
}

impl OperationFailedError {
    pub fn new(
        operation: impl Into<String>,
        status: OperationStatus,
        error: Option<CloudError>,
        body: Option<serde_json::Value>,
    ) -> Self {
        let summary = match &error {
            Some(err) => err.to_string(),
            None => "no error details returned".to_string(),
        };
        Self {
            operation: operation.into(),
            status,
            error,
            body,
            summary,
        }
    }

    /// Server error code, when one was reported
    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.code.as_deref())
    }
}

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    OperationFailed(#[from] OperationFailedError),

    /// The caller's cancellation token fired during a wait or a request
    #[error("cancelled while {during}")]
    Cancelled { during: &'static str },

    /// The server broke the long-running operation protocol
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl RuntimeError {
    pub(crate) fn transport(context: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Underlying transport error, if this is one
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { source, .. } => Some(source),
            _ => None,
        }
    }
}
