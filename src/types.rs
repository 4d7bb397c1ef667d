//! Core types shared by stream writers and their callers.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::StreamError;

/// Result delivered to a [`Completion`]: bytes written on success.
///
/// `cancel` and `flush` complete with `Ok(0)`.
pub type IoResult = Result<usize, StreamError>;

type Callback = Box<dyn FnOnce(IoResult) + Send + 'static>;

/// Immediate result of a stream writer operation.
///
/// Operations either finish synchronously ([`Outcome::Ready`]) or report
/// [`Outcome::Pending`], in which case the [`Completion`] they were given is
/// completed exactly once later. A `Ready` outcome never completes the
/// completion; the caller already holds the result.
#[must_use]
#[derive(Debug)]
pub enum Outcome {
    /// The operation finished synchronously with this result.
    Ready(IoResult),
    /// The result will be delivered through the completion.
    Pending,
}

impl Outcome {
    /// Returns `true` if the result will arrive through the completion.
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    /// Returns the synchronous result, or `None` if the outcome is pending.
    pub fn into_result(self) -> Option<IoResult> {
        match self {
            Outcome::Ready(result) => Some(result),
            Outcome::Pending => None,
        }
    }
}

impl From<IoResult> for Outcome {
    fn from(result: IoResult) -> Self {
        Outcome::Ready(result)
    }
}

/// A single-shot continuation slot.
///
/// Cloning a `Completion` yields another handle to the same slot. The
/// callback is moved out of the slot under its lock and the lock is released
/// before the callback runs, so a completion can never fire twice and a
/// callback that re-enters the writer sees the slot already cleared.
///
/// Dropping every handle without calling [`complete`](Completion::complete)
/// discards the callback without running it.
///
/// # Example
///
/// ```rust
/// use deferred_writer::Completion;
/// use std::sync::mpsc;
///
/// let (tx, rx) = mpsc::channel();
/// let done = Completion::new(move |result| tx.send(result.ok()).unwrap());
///
/// assert!(done.complete(Ok(2)));
/// assert!(!done.complete(Ok(3)));
/// assert_eq!(rx.recv().unwrap(), Some(2));
/// ```
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<Callback>>>,
}

impl Completion {
    /// Wraps a callback in a fresh slot.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(IoResult) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    /// Runs the callback with `result` if it has not run yet.
    ///
    /// Returns `true` if the callback was invoked by this call.
    pub fn complete(&self, result: IoResult) -> bool {
        let callback = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Returns `true` once the callback has been taken out of the slot.
    pub fn is_completed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Observable phase of a [`DeferredWriter`](crate::DeferredWriter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriterState {
    /// No backing store and nothing pending.
    Empty,
    /// A write is waiting for its snapshot to be created.
    Materializing,
    /// A cancel preempted the pending write; waiting for the snapshot request
    /// to resolve so it can be cleaned up.
    CancelledWhileMaterializing,
    /// The backing store exists and every call is delegated to it.
    Ready,
}
