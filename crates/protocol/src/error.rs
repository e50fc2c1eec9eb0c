//! Error types shared by the gateway and its callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mount::MountId;

/// Gateway error type covering every way a file operation can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The request itself is malformed (missing mount id, no paths, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A path escapes the mount's configured root.
    #[error("access denied: {path} is outside the mount root")]
    AccessDenied {
        /// The offending path, as supplied by the caller.
        path: String,
    },

    /// No mount record exists with the given id.
    #[error("file mount not found: {0}")]
    RecordNotFound(MountId),

    /// The machine could not be reached or rejected our credentials.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A shell command exited unsuccessfully or produced unparseable output.
    #[error("remote command `{command}` failed: {output}")]
    RemoteCommand {
        /// The command line that was executed.
        command: String,
        /// Raw remote output (or the transport failure when there was none).
        output: String,
    },

    /// A file-transfer protocol call failed.
    #[error("remote I/O error on {path}: {message}")]
    RemoteIo {
        /// Path the transfer call was operating on.
        path: String,
        /// Remote diagnostic text.
        message: String,
    },

    /// The mount record store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The remote call did not complete before the deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The remote call was aborted by a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

/// Stable error codes for callers that need to branch on failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    AccessDenied,
    RecordNotFound,
    ConnectionError,
    RemoteCommandError,
    RemoteIoError,
    StorageError,
    Timeout,
    Cancelled,
}

impl GatewayError {
    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            GatewayError::AccessDenied { .. } => ErrorCode::AccessDenied,
            GatewayError::RecordNotFound(_) => ErrorCode::RecordNotFound,
            GatewayError::Connection(_) => ErrorCode::ConnectionError,
            GatewayError::RemoteCommand { .. } => ErrorCode::RemoteCommandError,
            GatewayError::RemoteIo { .. } => ErrorCode::RemoteIoError,
            GatewayError::Storage(_) => ErrorCode::StorageError,
            GatewayError::Timeout(_) => ErrorCode::Timeout,
            GatewayError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Whether retrying the same request might succeed.
    ///
    /// Authorization and lookup failures are permanent; anything that touched
    /// the network may be transient.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GatewayError::Connection(_)
                | GatewayError::RemoteIo { .. }
                | GatewayError::RemoteCommand { .. }
                | GatewayError::Storage(_)
                | GatewayError::Timeout(_)
        )
    }

    /// Build a `RemoteIo` error from an I/O failure on `path`.
    pub fn remote_io(path: impl Into<String>, err: &std::io::Error) -> Self {
        GatewayError::RemoteIo {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
