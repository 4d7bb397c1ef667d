//! Error types for deferred stream writing.

use std::path::PathBuf;

/// Stream writer error type with contextual variants.
///
/// Every variant carries the context needed to make sense of it on its own
/// (the virtual or local path, the operation that failed). Errors produced by
/// a [`SnapshotAccessor`](crate::SnapshotAccessor) or a
/// [`StreamWriter`](crate::StreamWriter) delegate are passed through to the
/// caller unchanged.
///
/// # Examples
///
/// ```rust
/// use deferred_writer::StreamError;
/// use std::path::PathBuf;
///
/// let err = StreamError::NotFound { path: PathBuf::from("doc.txt") };
/// assert_eq!(err.to_string(), "not found: doc.txt");
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The virtual or local file does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// The operation is not valid in the writer's current state.
    ///
    /// Returned for contract violations such as a second `write` while the
    /// first one is still pending, or `cancel` before any `write`.
    #[error("{operation}: unexpected state")]
    UnexpectedState {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A virtual path could not be mapped onto the snapshot store.
    #[error("invalid path: {path} ({reason})")]
    InvalidPath {
        /// The offending virtual path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: &'static str,
    },

    /// The operation was aborted before it could run to completion.
    #[error("{operation}: aborted")]
    Aborted {
        /// The operation that was aborted.
        operation: &'static str,
    },

    /// No tokio runtime was available to run snapshot requests on.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// Generic accessor or delegate error.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error with context.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The path involved in the operation.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Wraps an I/O error with the operation and path it occurred on.
    ///
    /// `NotFound` errors are lifted into [`StreamError::NotFound`] so callers
    /// can match on them without digging into the source.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => StreamError::NotFound { path },
            _ => StreamError::Io {
                operation,
                path,
                source,
            },
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(error: std::io::Error) -> Self {
        StreamError::io("io", PathBuf::new(), error)
    }
}

impl From<tokio::task::JoinError> for StreamError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            StreamError::Aborted {
                operation: "blocking task",
            }
        } else {
            StreamError::Backend(format!("blocking task panicked: {error}"))
        }
    }
}
