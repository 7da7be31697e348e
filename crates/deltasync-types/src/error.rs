//! Structured error model for the sync engine.
//!
//! One error enum spans the workspace; variants map to the failure classes
//! a cycle can surface. Construct via the factory methods.

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by stores, codecs, and the cycle orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Bad or missing backend configuration (empty bucket, empty path,
    /// unusable database settings).
    #[error("config error: {message}")]
    Config { message: String },

    /// Baseline store used before `initialize()`.
    #[error("store not initialized: {message}")]
    NotInitialized { message: String },

    /// Filesystem, bucket, or database I/O failure.
    #[error("i/o error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// Malformed newline-delimited JSON line or non-decodable payload.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Record nesting exceeded the serialization depth bound.
    #[error("record nesting exceeds depth {limit}")]
    DepthExceeded { limit: usize },

    /// Reserved for adapter authors; the core never raises it — validation
    /// results live on the record.
    #[error("validation failure: {message}")]
    Validation { message: String },

    /// Cancellation observed at a suspension point.
    #[error("cancelled: {message}")]
    Cancelled { message: String },
}

impl SyncError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::NotInitialized {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// I/O failure wrapping an underlying driver error.
    pub fn io_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// True for the variant raised when cancellation was observed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SyncError>;
