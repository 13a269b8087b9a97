//! Per-worker double-ended task deque.
//!
//! The owning worker pushes and pops at the back (LIFO, so it keeps working
//! on the subtree it just split). Thieves take from the front (FIFO), which
//! holds the oldest and usually largest pending subtasks.
//!
//! A single `parking_lot` mutex guards each deque.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A worker's own end of its deque.
pub(crate) struct LocalDeque<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> LocalDeque<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Pushes a newly forked task.
    pub(crate) fn push(&self, task: T) {
        self.inner.lock().push_back(task);
    }

    /// Pops the most recently pushed task.
    pub(crate) fn pop(&self) -> Option<T> {
        self.inner.lock().pop_back()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Creates a handle other workers steal through.
    pub(crate) fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for LocalDeque<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDeque").field("len", &self.len()).finish()
    }
}

/// The stealing end of a worker's deque.
pub(crate) struct Stealer<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Stealer<T> {
    /// Takes the oldest task.
    pub(crate) fn steal(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
