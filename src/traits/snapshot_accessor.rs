//! The file-system accessor that hands out writable local snapshots.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::StreamError;

/// Resolves virtual paths to writable local snapshots.
///
/// A snapshot is a local file standing in for the virtual file during a write
/// session. Every successful [`create_writable_snapshot`] must be matched by
/// exactly one [`release_snapshot`]; releasing is the point at which the
/// accessor may synchronize the local content back to wherever the virtual
/// file really lives.
///
/// # Object Safety
///
/// This trait is object-safe: writers hold it as `Arc<dyn SnapshotAccessor>`.
///
/// [`create_writable_snapshot`]: SnapshotAccessor::create_writable_snapshot
/// [`release_snapshot`]: SnapshotAccessor::release_snapshot
#[async_trait]
pub trait SnapshotAccessor: Send + Sync {
    /// Create (or reopen) a writable local snapshot of `virtual_path`.
    ///
    /// # Returns
    ///
    /// The local path of the snapshot file.
    ///
    /// # Errors
    ///
    /// Any error is forwarded to the writer's caller unchanged.
    async fn create_writable_snapshot(&self, virtual_path: &Path) -> Result<PathBuf, StreamError>;

    /// Release the snapshot of `virtual_path`.
    ///
    /// The local path handed out for it must not be used afterwards.
    async fn release_snapshot(&self, virtual_path: &Path) -> Result<(), StreamError>;
}

#[async_trait]
impl<T: SnapshotAccessor + ?Sized> SnapshotAccessor for Arc<T> {
    async fn create_writable_snapshot(&self, virtual_path: &Path) -> Result<PathBuf, StreamError> {
        (**self).create_writable_snapshot(virtual_path).await
    }

    async fn release_snapshot(&self, virtual_path: &Path) -> Result<(), StreamError> {
        (**self).release_snapshot(virtual_path).await
    }
}
