//! # Local Stream Writer
//!
//! [`LocalStreamWriter`] is the delegate a deferred writer hands control to
//! once a writable snapshot exists. It writes sequentially into an existing
//! local file starting at a fixed offset.
//!
//! All blocking file I/O runs on the runtime's blocking pool; completions are
//! delivered from a runtime task. The file is opened on the first `write`
//! and closed when the writer and any in-flight operation are gone.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::{Completion, IoResult, Outcome, StreamError, StreamWriter, StreamWriterFactory};

/// Completion-driven writer over a real local file.
///
/// # Example
///
/// ```rust,no_run
/// use deferred_writer::{Completion, LocalStreamWriter, StreamWriter};
/// use bytes::Bytes;
///
/// # async fn demo() {
/// let writer = LocalStreamWriter::new(tokio::runtime::Handle::current(), "/tmp/out.bin", 0);
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// let done = Completion::new(move |result| {
///     let _ = tx.send(result);
/// });
/// assert!(writer.write(Bytes::from_static(b"hello"), done).is_pending());
/// assert_eq!(rx.await.unwrap().unwrap(), 5);
/// # }
/// ```
pub struct LocalStreamWriter {
    path: PathBuf,
    runtime: Handle,
    inner: Arc<Mutex<LocalInner>>,
}

struct LocalInner {
    // `None` before the first write and while lent to a blocking task.
    file: Option<File>,
    position: u64,
    op: Option<InFlight>,
}

struct InFlight {
    // Cleared when a cancel preempts the operation.
    completion: Option<Completion>,
    cancel: Option<Completion>,
}

impl LocalStreamWriter {
    /// Create a writer for `path` that begins writing at `offset`.
    ///
    /// Nothing is opened until the first [`write`](StreamWriter::write).
    pub fn new(runtime: Handle, path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            runtime,
            inner: Arc::new(Mutex::new(LocalInner {
                file: None,
                position: offset,
                op: None,
            })),
        }
    }

    /// The local file this writer targets.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the next write will land at.
    pub fn position(&self) -> u64 {
        self.lock().position
    }

    fn lock(&self) -> MutexGuard<'_, LocalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<F>(&self, file: Option<File>, job: F)
    where
        F: FnOnce(Option<File>) -> (Option<File>, IoResult) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = self.runtime.spawn_blocking(move || job(file));
        self.runtime.spawn(async move {
            let (file, result) = match task.await {
                Ok(done) => done,
                Err(err) => (None, Err(StreamError::from(err))),
            };
            finish(inner, file, result);
        });
    }
}

fn finish(inner: Arc<Mutex<LocalInner>>, file: Option<File>, result: IoResult) {
    let op = {
        let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
        if file.is_some() {
            state.file = file;
        }
        if let Ok(written) = &result {
            state.position += *written as u64;
        }
        state.op.take()
    };
    // Closes the file here if the writer was dropped meanwhile, so it is
    // never open while a completion runs on a writer that is gone.
    drop(inner);

    let Some(op) = op else {
        return;
    };
    if let Some(cancel) = op.cancel {
        cancel.complete(Ok(0));
    } else if let Some(completion) = op.completion {
        completion.complete(result);
    }
}

fn write_at(path: &Path, file: Option<File>, position: u64, buf: &[u8]) -> (Option<File>, IoResult) {
    let mut file = match file {
        Some(file) => file,
        None => match OpenOptions::new().write(true).open(path) {
            Ok(file) => file,
            Err(err) => return (None, Err(StreamError::io("open", path, err))),
        },
    };
    let result = file
        .seek(SeekFrom::Start(position))
        .and_then(|_| file.write_all(buf))
        .map(|()| buf.len())
        .map_err(|err| StreamError::io("write", path, err));
    (Some(file), result)
}

impl StreamWriter for LocalStreamWriter {
    fn write(&self, buf: Bytes, completion: Completion) -> Outcome {
        let (file, position) = {
            let mut inner = self.lock();
            if inner.op.is_some() {
                return Outcome::Ready(Err(StreamError::UnexpectedState { operation: "write" }));
            }
            inner.op = Some(InFlight {
                completion: Some(completion),
                cancel: None,
            });
            (inner.file.take(), inner.position)
        };

        let path = self.path.clone();
        self.run(file, move |file| write_at(&path, file, position, &buf));
        Outcome::Pending
    }

    fn cancel(&self, completion: Completion) -> Outcome {
        let mut inner = self.lock();
        match inner.op.as_mut() {
            Some(op) if op.cancel.is_none() => {
                op.completion = None;
                op.cancel = Some(completion);
                Outcome::Pending
            }
            _ => Outcome::Ready(Err(StreamError::UnexpectedState { operation: "cancel" })),
        }
    }

    fn flush(&self, completion: Completion) -> Outcome {
        let file = {
            let mut inner = self.lock();
            if inner.op.is_some() {
                return Outcome::Ready(Err(StreamError::UnexpectedState { operation: "flush" }));
            }
            let Some(file) = inner.file.take() else {
                return Outcome::Ready(Ok(0));
            };
            inner.op = Some(InFlight {
                completion: Some(completion),
                cancel: None,
            });
            file
        };

        let path = self.path.clone();
        self.run(Some(file), move |file| {
            let result = match &file {
                Some(file) => file
                    .sync_data()
                    .map(|()| 0)
                    .map_err(|err| StreamError::io("flush", &path, err)),
                None => Ok(0),
            };
            (file, result)
        });
        Outcome::Pending
    }
}

/// Builds [`LocalStreamWriter`]s on a fixed runtime.
///
/// This is the default factory of [`DeferredWriterBuilder`](crate::DeferredWriterBuilder).
#[derive(Debug, Clone)]
pub struct LocalWriterFactory {
    runtime: Handle,
}

impl LocalWriterFactory {
    /// Create a factory whose writers run their I/O on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl StreamWriterFactory for LocalWriterFactory {
    fn create(&self, local_path: &Path, offset: u64) -> Arc<dyn StreamWriter> {
        Arc::new(LocalStreamWriter::new(self.runtime.clone(), local_path, offset))
    }
}
