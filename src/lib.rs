//! # deferred-writer
//!
//! A stream writer for files that only exist somewhere else.
//!
//! Writing to a virtual file (one that lives in a remote or synthetic store)
//! usually means first obtaining a *writable local snapshot* of it. This
//! crate's [`DeferredWriter`] hides that step: the first `write` requests the
//! snapshot asynchronously, holds on to the buffer until it exists, and from
//! then on hands every call to a local writer on the snapshot file. Dropping
//! the writer closes the local file and releases the snapshot, which is when
//! the accessor synchronizes it back.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deferred_writer::{Completion, DeferredWriter, StagingAccessor, StreamWriter};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), deferred_writer::StreamError> {
//! let accessor = Arc::new(StagingAccessor::new("/srv/remote", "/var/cache/snapshots"));
//! let writer = DeferredWriter::new(accessor, "notes/today.txt", 0)?;
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! let done = Completion::new(move |result| {
//!     let _ = tx.send(result);
//! });
//! match writer.write(Bytes::from_static(b"hello"), done).into_result() {
//!     Some(result) => println!("finished synchronously: {result:?}"),
//!     None => println!("wrote {} bytes", rx.await.expect("completion dropped")?),
//! }
//!
//! drop(writer); // closes the local file, then releases the snapshot
//! # Ok(())
//! # }
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`StreamWriter`] | Completion-driven `write` / `cancel` / `flush` contract |
//! | [`SnapshotAccessor`] | Creates and releases writable local snapshots |
//! | [`DeferredWriter`] | Writer that materializes its snapshot on first write |
//! | [`LocalStreamWriter`] | Writer over a real local file at an offset |
//! | [`StagingAccessor`] | Accessor staging a source directory through a cache |
//! | [`Completion`] | Single-shot continuation slot |
//! | [`Outcome`] | Immediate result: ready now or pending |
//! | [`StreamError`] | Error type with context |
//!
//! ---
//!
//! ## Completion Contract
//!
//! Every operation returns an [`Outcome`]. `Outcome::Ready` carries the
//! result and leaves the [`Completion`] untouched; `Outcome::Pending` means
//! the completion fires exactly once later. A `cancel` issued while the
//! snapshot is still being created always wins: the write's completion is
//! dropped without running, and the cancel completes once the snapshot
//! request resolves.
//!
//! ---
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` and take `&self`. A single caller is
//! expected to drive a writer; completions may run on runtime worker threads.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Enable serialization for [`WriterState`] |

// Private modules
mod deferred;
mod error;
mod local;
mod staging;
mod traits;
mod types;

// Public re-exports - error types
pub use error::StreamError;

// Public re-exports - core types
pub use types::{Completion, IoResult, Outcome, WriterState};

// Public re-exports - collaborator traits
pub use traits::{SnapshotAccessor, StreamWriter, StreamWriterFactory};

// Public re-exports - writers
pub use deferred::{DeferredWriter, DeferredWriterBuilder};
pub use local::{LocalStreamWriter, LocalWriterFactory};

// Public re-exports - accessors
pub use staging::{StagingAccessor, normalize_virtual_path};
