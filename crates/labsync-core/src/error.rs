//! Error Types
//!
//! Failures of a directory snapshot source. Any of these aborts the sync
//! run that asked for the snapshot before a single identity is touched.

use thiserror::Error;

/// Errors raised while fetching a directory snapshot.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory could not be reached.
    #[error("Directory unreachable: {message}")]
    Unreachable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The directory did not answer in time.
    #[error("Directory request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The bind credentials were rejected.
    #[error("Directory authentication failed")]
    AuthenticationFailed,

    /// The directory answered with an error.
    #[error("Directory query failed: {message}")]
    QueryFailed { message: String },

    /// The source is misconfigured.
    #[error("Invalid directory configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A snapshot file could not be read.
    #[error("Snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot file could not be parsed.
    #[error("Snapshot parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl DirectoryError {
    /// Create an unreachable error without an underlying cause.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unreachable error wrapping the transport error.
    pub fn unreachable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unreachable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error.
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Check if a later attempt could succeed without operator action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::QueryFailed { .. }
        )
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;
