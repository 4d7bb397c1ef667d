//! # Collaborator Traits
//!
//! The two seams a [`DeferredWriter`](crate::DeferredWriter) is built on:
//!
//! | Trait | Role |
//! |-------|------|
//! | [`StreamWriter`] | Completion-driven `write` / `cancel` / `flush` on one file |
//! | [`StreamWriterFactory`] | Builds the local writer once a snapshot exists |
//! | [`SnapshotAccessor`] | Async creation and release of writable local snapshots |
//!
//! `DeferredWriter` itself implements [`StreamWriter`], so callers can hold
//! either a deferred or an already-local writer behind the same trait object.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`. Methods take `&self`; implementations
//! keep their state behind interior mutability.

mod snapshot_accessor;
mod stream_writer;

pub use snapshot_accessor::SnapshotAccessor;
pub use stream_writer::{StreamWriter, StreamWriterFactory};
