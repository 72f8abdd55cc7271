//! Error types for the indexer.
//!
//! Errors are categorized by where they originate so that the traversal
//! layer can decide what to retry and the caller can report something
//! meaningful when a whole run is aborted.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Errors that can occur while building or writing an index.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Malformed tileset, b3dm, GLB or glTF content
    #[error("format error in {context}: {message}")]
    Format { context: String, message: String },

    /// Failed to open, read or write a file
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP fetch or upload failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Degenerate or non-convergent ellipsoid projection
    #[error("geometry error: {0}")]
    Geometry(String),

    /// An operation kept failing until the retry budget ran out
    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<IndexerError>,
    },

    /// One or more tiles failed during traversal
    #[error("{} tile(s) failed: {}", .failures.len(), summarize(.failures))]
    Traversal { failures: Vec<IndexerError> },

    /// The caller cancelled the run
    #[error("operation cancelled")]
    Cancelled,

    /// Internal error (task panicked, channel closed unexpectedly)
    #[error("internal error: {0}")]
    Internal(String),
}

impl IndexerError {
    /// Creates a format error for the given context (usually a path).
    pub fn format(context: impl Into<String>, message: impl Into<String>) -> Self {
        IndexerError::Format {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates an I/O error tagged with the path it occurred on.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        IndexerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a failed operation is worth another attempt.
    ///
    /// Everything but cancellation is retried; the retry budget bounds the
    /// cost of retrying errors that turn out to be permanent.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IndexerError::Cancelled)
    }

    /// Number of leaf failures carried by this error.
    ///
    /// Aggregate traversal errors count their members; every other error
    /// counts as one.
    pub fn failure_count(&self) -> usize {
        match self {
            IndexerError::Traversal { failures } => {
                failures.iter().map(IndexerError::failure_count).sum()
            }
            _ => 1,
        }
    }
}

fn summarize(failures: &[IndexerError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
