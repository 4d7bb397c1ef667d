//! # Staging Accessor
//!
//! A [`SnapshotAccessor`] that stages files from a *source* directory into a
//! *cache* directory.
//!
//! The source directory plays the part of the remote store. Creating a
//! snapshot copies the source file into the cache (or creates an empty one if
//! the source does not exist yet); releasing the last handle on it copies the
//! cache file back over the source and removes it from the cache. Nothing
//! reaches the source before that release.
//!
//! ```text
//! create_writable_snapshot("a/b.txt"):  source/a/b.txt ──copy──▶ cache/a/b.txt
//! release_snapshot("a/b.txt"):          cache/a/b.txt  ──copy──▶ source/a/b.txt
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{SnapshotAccessor, StreamError};

/// Directory-backed snapshot accessor.
///
/// Snapshots are reference counted per virtual path: opening the same path
/// twice hands out the same local file, and only the final release
/// synchronizes it back.
#[derive(Debug)]
pub struct StagingAccessor {
    source_root: PathBuf,
    cache_root: PathBuf,
    open: Mutex<HashMap<PathBuf, OpenSnapshot>>,
}

#[derive(Debug)]
struct OpenSnapshot {
    local_path: PathBuf,
    open_count: usize,
}

impl StagingAccessor {
    /// Stage files from `source_root` into `cache_root`.
    ///
    /// Neither directory is touched until the first snapshot is requested.
    pub fn new(source_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            cache_root: cache_root.into(),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Directory standing in for the remote store.
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Directory that holds live snapshots.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Normalized virtual paths with a live snapshot, sorted.
    pub async fn open_snapshots(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.open.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Lexically normalize a virtual path relative to the store root.
///
/// Leading `/` and `.` components are dropped and `..` pops a component.
///
/// # Errors
///
/// - [`StreamError::InvalidPath`] if `..` climbs above the root or nothing
///   is left after normalization
pub fn normalize_virtual_path(virtual_path: &Path) -> Result<PathBuf, StreamError> {
    let invalid = |reason| StreamError::InvalidPath {
        path: virtual_path.to_path_buf(),
        reason,
    };

    let mut normalized = PathBuf::new();
    for component in virtual_path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(invalid("escapes root"));
                }
            }
            Component::Normal(name) => normalized.push(name),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(normalized)
}

async fn ensure_parent(path: &Path) -> Result<(), StreamError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StreamError::io("create_dir_all", parent, err)),
        _ => Ok(()),
    }
}

#[async_trait]
impl SnapshotAccessor for StagingAccessor {
    async fn create_writable_snapshot(&self, virtual_path: &Path) -> Result<PathBuf, StreamError> {
        let normalized = normalize_virtual_path(virtual_path)?;
        let mut open = self.open.lock().await;

        if let Some(snapshot) = open.get_mut(&normalized) {
            snapshot.open_count += 1;
            return Ok(snapshot.local_path.clone());
        }

        let source = self.source_root.join(&normalized);
        let local_path = self.cache_root.join(&normalized);
        ensure_parent(&local_path).await?;

        match tokio::fs::copy(&source, &local_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::File::create(&local_path)
                    .await
                    .map_err(|err| StreamError::io("create", &local_path, err))?;
            }
            Err(err) => return Err(StreamError::io("copy", &source, err)),
        }

        log::debug!(
            "staged {} at {}",
            normalized.display(),
            local_path.display()
        );
        open.insert(
            normalized,
            OpenSnapshot {
                local_path: local_path.clone(),
                open_count: 1,
            },
        );
        Ok(local_path)
    }

    async fn release_snapshot(&self, virtual_path: &Path) -> Result<(), StreamError> {
        let normalized = normalize_virtual_path(virtual_path)?;
        let mut open = self.open.lock().await;

        let Some(snapshot) = open.get_mut(&normalized) else {
            return Err(StreamError::NotFound {
                path: virtual_path.to_path_buf(),
            });
        };
        if snapshot.open_count > 1 {
            snapshot.open_count -= 1;
            return Ok(());
        }

        // The entry stays open until the copy lands, so a failed release can
        // be retried without losing the cached contents.
        let local_path = snapshot.local_path.clone();
        let source = self.source_root.join(&normalized);
        ensure_parent(&source).await?;
        tokio::fs::copy(&local_path, &source)
            .await
            .map_err(|err| StreamError::io("copy", &local_path, err))?;
        open.remove(&normalized);
        tokio::fs::remove_file(&local_path)
            .await
            .map_err(|err| StreamError::io("remove_file", &local_path, err))?;

        log::debug!("synchronized {} back to source", normalized.display());
        Ok(())
    }
}
