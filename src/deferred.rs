//! # Deferred Writer
//!
//! A [`StreamWriter`] whose backing file does not exist yet.
//!
//! ## Lifecycle
//!
//! ```text
//!            write                  snapshot ok
//!   Empty ──────────▶ Materializing ────────────▶ Ready (delegates everything)
//!     ▲                   │    │
//!     │  snapshot failed  │    │ cancel
//!     ├───────────────────┘    ▼
//!     └──────────── CancelledWhileMaterializing
//!          snapshot resolved (released if it was created)
//! ```
//!
//! The first `write` asks the [`SnapshotAccessor`] for a writable local
//! snapshot of the virtual path on the writer's runtime. Once it resolves, a
//! local writer is built through the [`StreamWriterFactory`] and the buffered
//! write is replayed against it. Every later call goes straight to that local
//! writer.
//!
//! The resolution task only holds a weak reference to the writer state, so a
//! writer dropped mid-flight is never touched afterwards. Any snapshot that
//! gets created is released exactly once: on drop after `Ready`, right after
//! resolution when a cancel preempted the write, or by the orphaned task when
//! the writer is already gone.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::{
    Completion, LocalWriterFactory, Outcome, SnapshotAccessor, StreamError, StreamWriter,
    StreamWriterFactory, WriterState,
};

enum State {
    Empty,
    Materializing { buf: Bytes, completion: Completion },
    CancelledWhileMaterializing { cancel: Completion },
    Ready(Arc<dyn StreamWriter>),
}

impl State {
    fn kind(&self) -> WriterState {
        match self {
            State::Empty => WriterState::Empty,
            State::Materializing { .. } => WriterState::Materializing,
            State::CancelledWhileMaterializing { .. } => WriterState::CancelledWhileMaterializing,
            State::Ready(_) => WriterState::Ready,
        }
    }

    fn delegate(&self) -> Option<Arc<dyn StreamWriter>> {
        match self {
            State::Ready(delegate) => Some(Arc::clone(delegate)),
            _ => None,
        }
    }
}

/// Stream writer that materializes its backing file on the first write.
///
/// Construct one with [`DeferredWriter::builder`] or [`DeferredWriter::new`]
/// and drive it through the [`StreamWriter`] trait.
///
/// # Example
///
/// ```rust,no_run
/// use deferred_writer::{Completion, DeferredWriter, StagingAccessor, StreamWriter};
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// # async fn demo() -> Result<(), deferred_writer::StreamError> {
/// let accessor = Arc::new(StagingAccessor::new("/srv/remote", "/var/cache/snapshots"));
/// let writer = DeferredWriter::builder(accessor, "reports/q3.csv")
///     .offset(0)
///     .build()?;
///
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// let done = Completion::new(move |result| {
///     let _ = tx.send(result);
/// });
/// if writer.write(Bytes::from_static(b"a,b,c\n"), done).is_pending() {
///     let written = rx.await.expect("completion dropped")?;
///     assert_eq!(written, 6);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DeferredWriter {
    virtual_path: PathBuf,
    offset: u64,
    accessor: Arc<dyn SnapshotAccessor>,
    factory: Arc<dyn StreamWriterFactory>,
    runtime: Handle,
    state: Arc<Mutex<State>>,
}

impl DeferredWriter {
    /// Start configuring a writer for `virtual_path`.
    pub fn builder(
        accessor: Arc<dyn SnapshotAccessor>,
        virtual_path: impl Into<PathBuf>,
    ) -> DeferredWriterBuilder {
        DeferredWriterBuilder {
            accessor,
            virtual_path: virtual_path.into(),
            offset: 0,
            runtime: None,
            factory: None,
        }
    }

    /// Writer on the current runtime using local file delegates.
    ///
    /// # Errors
    ///
    /// - [`StreamError::NoRuntime`] if called outside a tokio runtime
    pub fn new(
        accessor: Arc<dyn SnapshotAccessor>,
        virtual_path: impl Into<PathBuf>,
        offset: u64,
    ) -> Result<Self, StreamError> {
        Self::builder(accessor, virtual_path).offset(offset).build()
    }

    /// The virtual path this writer materializes.
    pub fn virtual_path(&self) -> &Path {
        &self.virtual_path
    }

    /// Offset the first write lands at once the snapshot exists.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current phase of the writer.
    pub fn state(&self) -> WriterState {
        self.lock().kind()
    }

    /// Returns `true` once the local writer exists.
    pub fn is_ready(&self) -> bool {
        self.state() == WriterState::Ready
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn materialize(&self) {
        let task = Materialization {
            state: Arc::downgrade(&self.state),
            accessor: Arc::clone(&self.accessor),
            factory: Arc::clone(&self.factory),
            runtime: self.runtime.clone(),
            virtual_path: self.virtual_path.clone(),
            offset: self.offset,
        };
        log::debug!(
            "requesting writable snapshot of {}",
            self.virtual_path.display()
        );
        self.runtime.spawn(task.run());
    }
}

impl StreamWriter for DeferredWriter {
    fn write(&self, buf: Bytes, completion: Completion) -> Outcome {
        let mut state = self.lock();
        if let Some(delegate) = state.delegate() {
            drop(state);
            return delegate.write(buf, completion);
        }
        if !matches!(*state, State::Empty) {
            return Outcome::Ready(Err(StreamError::UnexpectedState { operation: "write" }));
        }

        if self.virtual_path.as_os_str().is_empty() {
            return Outcome::Ready(Err(StreamError::NotFound {
                path: PathBuf::new(),
            }));
        }

        *state = State::Materializing { buf, completion };
        drop(state);
        self.materialize();
        Outcome::Pending
    }

    fn cancel(&self, completion: Completion) -> Outcome {
        let mut state = self.lock();
        if let Some(delegate) = state.delegate() {
            drop(state);
            return delegate.cancel(completion);
        }

        if !matches!(*state, State::Materializing { .. }) {
            return Outcome::Ready(Err(StreamError::UnexpectedState { operation: "cancel" }));
        }
        // The pending write completion is discarded here, unrun.
        *state = State::CancelledWhileMaterializing { cancel: completion };
        Outcome::Pending
    }

    fn flush(&self, completion: Completion) -> Outcome {
        let state = self.lock();
        if let Some(delegate) = state.delegate() {
            drop(state);
            return delegate.flush(completion);
        }

        match *state {
            State::CancelledWhileMaterializing { .. } => {
                Outcome::Ready(Err(StreamError::UnexpectedState { operation: "flush" }))
            }
            // Nothing reaches the remote side before the snapshot is released.
            _ => Outcome::Ready(Ok(0)),
        }
    }
}

impl Drop for DeferredWriter {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut *self.lock(), State::Empty);
        if let State::Ready(delegate) = state {
            // The local file must be closed before the accessor may move it.
            drop(delegate);
            spawn_release(
                &self.runtime,
                Arc::clone(&self.accessor),
                self.virtual_path.clone(),
            );
        }
    }
}

impl fmt::Debug for DeferredWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredWriter")
            .field("virtual_path", &self.virtual_path)
            .field("offset", &self.offset)
            .field("state", &self.state())
            .finish()
    }
}

/// One outstanding snapshot request.
struct Materialization {
    state: Weak<Mutex<State>>,
    accessor: Arc<dyn SnapshotAccessor>,
    factory: Arc<dyn StreamWriterFactory>,
    runtime: Handle,
    virtual_path: PathBuf,
    offset: u64,
}

impl Materialization {
    async fn run(self) {
        let snapshot = self
            .accessor
            .create_writable_snapshot(&self.virtual_path)
            .await;

        match self.state.upgrade() {
            Some(state) => self.resolve(&state, snapshot),
            None => {
                log::debug!(
                    "writer for {} dropped before its snapshot resolved",
                    self.virtual_path.display()
                );
                if snapshot.is_ok() {
                    self.release();
                }
            }
        }
    }

    fn resolve(&self, state: &Mutex<State>, snapshot: Result<PathBuf, StreamError>) {
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *guard, State::Empty) {
            State::CancelledWhileMaterializing { cancel } => {
                drop(guard);
                if snapshot.is_ok() {
                    self.release();
                }
                cancel.complete(Ok(0));
            }
            State::Materializing { buf, completion } => match snapshot {
                Err(err) => {
                    drop(guard);
                    log::debug!(
                        "snapshot of {} failed: {err}",
                        self.virtual_path.display()
                    );
                    completion.complete(Err(err));
                }
                Ok(local_path) => {
                    log::debug!(
                        "snapshot of {} ready at {}",
                        self.virtual_path.display(),
                        local_path.display()
                    );
                    let delegate = self.factory.create(&local_path, self.offset);
                    *guard = State::Ready(Arc::clone(&delegate));
                    drop(guard);
                    let outcome = delegate.write(buf, completion.clone());
                    // Once the completion runs, the writer holds the only
                    // reference to the local writer.
                    drop(delegate);
                    if let Outcome::Ready(result) = outcome {
                        completion.complete(result);
                    }
                }
            },
            State::Empty => {
                // Drop won the lock: the writer is gone and adopted nothing.
                drop(guard);
                if snapshot.is_ok() {
                    self.release();
                }
            }
            State::Ready(delegate) => {
                // Only this task installs a delegate, so this cannot happen.
                *guard = State::Ready(delegate);
                drop(guard);
                log::warn!(
                    "snapshot of {} resolved for a writer that is already ready",
                    self.virtual_path.display()
                );
                if snapshot.is_ok() {
                    self.release();
                }
            }
        }
    }

    fn release(&self) {
        spawn_release(
            &self.runtime,
            Arc::clone(&self.accessor),
            self.virtual_path.clone(),
        );
    }
}

fn spawn_release(runtime: &Handle, accessor: Arc<dyn SnapshotAccessor>, virtual_path: PathBuf) {
    log::debug!("releasing snapshot of {}", virtual_path.display());
    runtime.spawn(async move {
        if let Err(err) = accessor.release_snapshot(&virtual_path).await {
            log::warn!(
                "failed to release snapshot of {}: {err}",
                virtual_path.display()
            );
        }
    });
}

/// Configuration for a [`DeferredWriter`].
///
/// | Setting | Default |
/// |---------|---------|
/// | `offset` | `0` |
/// | `runtime` | the runtime the builder is built on |
/// | `writer_factory` | [`LocalWriterFactory`] on that runtime |
pub struct DeferredWriterBuilder {
    accessor: Arc<dyn SnapshotAccessor>,
    virtual_path: PathBuf,
    offset: u64,
    runtime: Option<Handle>,
    factory: Option<Arc<dyn StreamWriterFactory>>,
}

impl DeferredWriterBuilder {
    /// Byte offset the first write starts at.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Runtime that snapshot requests and releases run on.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Factory for the local writer built once the snapshot exists.
    pub fn writer_factory(mut self, factory: Arc<dyn StreamWriterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the writer. Nothing is requested from the accessor yet.
    ///
    /// # Errors
    ///
    /// - [`StreamError::NoRuntime`] if no runtime was given and none is current
    pub fn build(self) -> Result<DeferredWriter, StreamError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| StreamError::NoRuntime)?,
        };
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(LocalWriterFactory::new(runtime.clone())));

        Ok(DeferredWriter {
            virtual_path: self.virtual_path,
            offset: self.offset,
            accessor: self.accessor,
            factory,
            runtime,
            state: Arc::new(Mutex::new(State::Empty)),
        })
    }
}
