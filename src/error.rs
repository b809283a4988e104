//! Error taxonomy shared by the locator, synchronizer, content service and
//! HTTP layer.

use std::path::PathBuf;

/// Failure of a single-code operation.
///
/// `NotFound` and `Io` are kept apart so operators can tell missing content
/// from a broken environment.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// No document in the content directory matches the code.
    #[error("no document found for code {0}")]
    NotFound(String),

    /// More than one document matches the code.
    #[error("code {code} matches {} documents: {}", .files.len(), .files.join(", "))]
    Ambiguous { code: String, files: Vec<String> },

    /// The content directory or a document could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Parsing produced zero module blocks.
    #[error("document {file_name} for code {code} contains no module blocks")]
    EmptyParse { code: String, file_name: String },

    /// The block store failed; the write was rolled back.
    #[error("store error: {0}")]
    Store(String),

    /// A per-code sync exceeded its time budget.
    #[error("sync for code {code} timed out after {timeout_ms}ms")]
    Timeout { code: String, timeout_ms: u64 },

    /// A background task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ContentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a store error from any error type.
    pub fn from_store<E: std::fmt::Display>(e: E) -> Self {
        Self::Store(e.to_string())
    }

    /// Machine-readable kind, used in reports and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Ambiguous { .. } => "ambiguous",
            Self::Io { .. } => "io",
            Self::EmptyParse { .. } => "empty_parse",
            Self::Store(_) => "store",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Store failures and timeouts leave no partial state and can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout { .. })
    }
}

impl From<sqlx::Error> for ContentError {
    fn from(e: sqlx::Error) -> Self {
        Self::from_store(e)
    }
}
