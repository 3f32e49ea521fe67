//! Core error types.

use std::time::Duration;

use thiserror::Error;

/// Why an execution was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called on the request or its execution.
    Explicit,
    /// A newer start with the same identifier replaced this one (`LastWins`).
    Superseded,
    /// The caller released the request while the engine held it weakly.
    Released,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicit"),
            Self::Superseded => write!(f, "superseded"),
            Self::Released => write!(f, "released"),
        }
    }
}

/// Coarse error classification, used by callers to tell "failed" from
/// "cancelled" without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    RedirectionLoop,
    DuplicateSuppressed,
    Cancelled,
    Cache,
    Configuration,
    InvalidRequest,
    Internal,
}

/// Errors produced while executing a request.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: Option<bytes::Bytes>,
    },

    /// Connection-level failure reported by the transport.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport gave up waiting.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Body encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local file I/O failed (download target, upload source).
    #[error("I/O error: {0}")]
    Io(String),

    /// The redirection interceptor kept asking for restarts past the cap.
    #[error("Redirection loop: {restarts} restarts exceeded cap of {cap}")]
    RedirectionLoop { restarts: u32, cap: u32 },

    /// Another start with the same identifier is already running (`FirstWins`).
    #[error("Duplicate request suppressed: {identifier}")]
    DuplicateSuppressed { identifier: String },

    /// The execution was cancelled before it reached a terminal state.
    #[error("Request cancelled ({reason})")]
    Cancelled { reason: CancelReason },

    /// Cache lookup or store failed. Logged only, never delivered.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request could not be prepared or was mutated while executing.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A hook panicked or a worker task was lost.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RequestError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
        }
    }

    pub const fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled { reason }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { .. }
            | Self::Connection(_)
            | Self::Timeout(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Transport,
            Self::RedirectionLoop { .. } => ErrorKind::RedirectionLoop,
            Self::DuplicateSuppressed { .. } => ErrorKind::DuplicateSuppressed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure came from the transport collaborator.
    pub const fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }
}
