//! The stream-writer contract and the factory that builds local delegates.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::{Completion, Outcome};

/// Sequential, completion-driven writer for a single file.
///
/// Every operation returns an [`Outcome`]. `Outcome::Ready` carries the
/// result directly and the completion is left untouched; `Outcome::Pending`
/// means the completion will be completed exactly once later, possibly from
/// another thread.
///
/// # Call Discipline
///
/// A single caller drives the writer. `write` must not be issued while a
/// previous `write` is still pending, and at most one `cancel` may be
/// outstanding. Implementations report violations as
/// [`StreamError::UnexpectedState`](crate::StreamError::UnexpectedState).
///
/// # Object Safety
///
/// This trait is object-safe and is normally held as `Arc<dyn StreamWriter>`.
pub trait StreamWriter: Send + Sync {
    /// Write `buf` at the writer's current position.
    ///
    /// Completes with the number of bytes written.
    fn write(&self, buf: Bytes, completion: Completion) -> Outcome;

    /// Cancel the in-flight operation.
    ///
    /// The cancelled operation's completion is never invoked once `cancel`
    /// has been accepted. Completes with `Ok(0)`.
    fn cancel(&self, completion: Completion) -> Outcome;

    /// Flush written data to the underlying storage. Completes with `Ok(0)`.
    fn flush(&self, completion: Completion) -> Outcome;
}

/// Builds the local [`StreamWriter`] once a writable snapshot exists.
pub trait StreamWriterFactory: Send + Sync {
    /// Create a writer for `local_path` that starts writing at `offset`.
    fn create(&self, local_path: &Path, offset: u64) -> Arc<dyn StreamWriter>;
}

impl<F> StreamWriterFactory for F
where
    F: Fn(&Path, u64) -> Arc<dyn StreamWriter> + Send + Sync,
{
    fn create(&self, local_path: &Path, offset: u64) -> Arc<dyn StreamWriter> {
        self(local_path, offset)
    }
}
