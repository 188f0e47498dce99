//! Error taxonomy for capture operations
//!
//! Every error surfaced to a caller carries its underlying cause plus a
//! short structured context (url, request id, selector, or capture id)
//! so failures can be traced back to the CDP exchange that produced them.

use std::path::PathBuf;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input failed validation before any browser work started
    #[error("validation failed: {0}")]
    Validation(String),

    /// A rule pattern failed to compile
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Configuration is structurally valid but unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Browser process could not be started
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Browser did not become ready within the launch deadline
    #[error("browser launch timed out after {0:?}")]
    LaunchTimeout(std::time::Duration),

    /// Could not attach to a running browser
    #[error("attach to {host}:{port} failed: {reason}")]
    Attach {
        host: String,
        port: u16,
        reason: String,
    },

    /// Navigation failed outright (not a timeout)
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Navigation exceeded the wait policy deadline
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout {
        url: String,
        timeout: std::time::Duration,
    },

    /// Operation attempted in a session state that does not permit it
    #[error("invalid session state: {op} requires {expected}, session is {actual}")]
    InvalidState {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    /// The CDP connection is gone; the session is failed
    #[error("CDP connection lost: {0}")]
    ConnectionLost(String),

    /// A CDP message could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A user-supplied script failed
    #[error("script {index} failed: {reason}")]
    Script { index: usize, reason: String },

    /// A bounded operation ran out of time
    #[error("{op} timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: std::time::Duration,
    },

    /// Capture store operation failed
    #[error("capture error: {0}")]
    Capture(String),

    /// No record with the given id
    #[error("capture not found: {0}")]
    CaptureNotFound(String),

    /// Filesystem failure in the capture store or HAR output
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Exit code contract for the thin CLI collaborator.
    ///
    /// 0 success, 2 configuration/validation, 3 launch/attach,
    /// 4 navigation timeout, 5 capture failure, 6 diff failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_)
            | Self::InvalidPattern { .. }
            | Self::Configuration(_) => 2,
            Self::Launch(_) | Self::LaunchTimeout(_) | Self::Attach { .. } => 3,
            Self::NavigationTimeout { .. } => 4,
            Self::CaptureNotFound(_) => 6,
            _ => 5,
        }
    }

    /// Whether the error is fatal to the owning session.
    ///
    /// Fatal errors flip the session to `failed`; every later operation
    /// answers `ConnectionLost`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::Protocol(_))
    }
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        use chromiumoxide::error::CdpError;
        match err {
            CdpError::Timeout => Self::Timeout {
                op: "cdp command",
                timeout: std::time::Duration::from_secs(30),
            },
            CdpError::Ws(e) => Self::ConnectionLost(e.to_string()),
            CdpError::ChannelSendError(e) => Self::ConnectionLost(e.to_string()),
            CdpError::Serde(e) => Self::Protocol(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        // {:#} keeps the full context chain in one line
        Self::Capture(format!("{err:#}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
