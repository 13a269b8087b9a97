//! Writer-preferring read-write lock with thread ownership.
//!
//! Any number of threads may hold the read lock at once; at most one thread
//! holds the write lock, and it excludes all readers and other writers.
//!
//! # Writer-Preference Fairness
//!
//! Once a writer is waiting, new read acquisitions queue behind it. This
//! prevents writer starvation under heavy read load but can delay readers
//! under continuous write pressure.
//!
//! ## Fairness Characteristics
//!
//! | Scenario                  | Behavior                                      |
//! |---------------------------|-----------------------------------------------|
//! | No writers waiting        | Readers acquire immediately                   |
//! | Writer waiting            | New readers blocked until writer completes    |
//! | Existing readers + writer | Writer waits for all readers to release       |
//! | Multiple writers          | Writers queue in arrival order (FIFO)         |
//!
//! Two exceptions keep the policy from self-deadlocking: a thread that
//! already holds a read lock may take another read hold, and the write owner
//! may take read holds (downgrade: acquire read, then release write).
//! Upgrading a read hold to a write hold is refused with `IllegalState`.
//!
//! Both locks are reentrant and owned by the acquiring thread; releasing a
//! lock the calling thread does not hold fails with `NotOwner`.
//!
//! # Example
//!
//! ```
//! use strand::sync::ReadWriteLock;
//!
//! let lock = ReadWriteLock::new();
//! {
//!     let _r1 = lock.read();
//!     let _r2 = lock.read();
//!     assert_eq!(lock.read_lock_count(), 2);
//! }
//! let _w = lock.write().unwrap();
//! assert!(lock.is_write_locked());
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};
use crate::tracing_compat::trace;

#[derive(Debug, Default)]
struct State {
    readers: HashMap<ThreadId, usize>,
    writer: Option<ThreadId>,
    write_holds: usize,
    writer_queue: VecDeque<u64>,
    next_ticket: u64,
}

impl State {
    fn can_read(&self, me: ThreadId) -> bool {
        self.writer == Some(me)
            || self.readers.contains_key(&me)
            || (self.writer.is_none() && self.writer_queue.is_empty())
    }

    fn can_write(&self, ticket: u64) -> bool {
        self.writer.is_none()
            && self.readers.is_empty()
            && self.writer_queue.front() == Some(&ticket)
    }
}

/// A read-write lock whose holds belong to threads rather than guards.
#[derive(Debug, Default)]
pub struct ReadWriteLock {
    state: Mutex<State>,
    cvar: Condvar,
}

impl ReadWriteLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a read hold, blocking while a writer holds or awaits the lock.
    pub fn read_lock(&self) {
        let _ = self.read_inner(None, false);
    }

    /// Like [`read_lock`](Self::read_lock) but fails with `Interrupted`.
    pub fn read_lock_interruptibly(&self) -> Result<()> {
        self.read_inner(None, true).map(|_| ())
    }

    /// Acquires a read hold only if that is possible without waiting.
    #[must_use]
    pub fn try_read_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.can_read(me) {
            *state.readers.entry(me).or_insert(0) += 1;
            true
        } else {
            false
        }
    }

    /// Acquires a read hold, waiting at most `timeout`.
    #[must_use]
    pub fn try_read_lock_timeout(&self, timeout: Duration) -> bool {
        self.read_inner(interrupt::deadline_after(Some(timeout)), false)
            .unwrap_or(false)
    }

    /// Releases one read hold of the calling thread.
    pub fn read_unlock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let Some(count) = state.readers.get_mut(&me) else {
            return Err(Error::not_owner("read lock"));
        };
        *count -= 1;
        if *count == 0 {
            state.readers.remove(&me);
            if state.readers.is_empty() {
                self.cvar.notify_all();
            }
        }
        Ok(())
    }

    /// Acquires the write lock, blocking until every other hold is released.
    ///
    /// Fails with `IllegalState` if the calling thread holds only a read lock.
    pub fn write_lock(&self) -> Result<()> {
        self.write_inner(None, false).map(|_| ())
    }

    /// Like [`write_lock`](Self::write_lock) but fails with `Interrupted`.
    pub fn write_lock_interruptibly(&self) -> Result<()> {
        self.write_inner(None, true).map(|_| ())
    }

    /// Acquires the write lock only if it is free right now.
    #[must_use]
    pub fn try_write_lock(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            state.write_holds += 1;
            return true;
        }
        if state.writer.is_none() && state.readers.is_empty() && state.writer_queue.is_empty() {
            state.writer = Some(me);
            state.write_holds = 1;
            return true;
        }
        false
    }

    /// Acquires the write lock, waiting at most `timeout`.
    #[must_use]
    pub fn try_write_lock_timeout(&self, timeout: Duration) -> bool {
        self.write_inner(interrupt::deadline_after(Some(timeout)), false)
            .unwrap_or(false)
    }

    /// Releases one write hold of the calling thread.
    pub fn write_unlock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer != Some(me) {
            return Err(Error::not_owner("write lock"));
        }
        state.write_holds -= 1;
        if state.write_holds == 0 {
            state.writer = None;
            self.cvar.notify_all();
        }
        Ok(())
    }

    /// Acquires a read hold released when the guard drops.
    pub fn read(&self) -> ReadGuard<'_> {
        self.read_lock();
        ReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the write lock, released when the guard drops.
    pub fn write(&self) -> Result<WriteGuard<'_>> {
        self.write_lock()?;
        Ok(WriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Total read holds across all threads.
    #[must_use]
    pub fn read_lock_count(&self) -> usize {
        self.state.lock().readers.values().sum()
    }

    /// Read holds of the calling thread.
    #[must_use]
    pub fn read_hold_count(&self) -> usize {
        let me = thread::current().id();
        self.state.lock().readers.get(&me).copied().unwrap_or(0)
    }

    /// Returns true if any thread holds the write lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state.lock().writer.is_some()
    }

    /// Returns true if the calling thread holds the write lock.
    #[must_use]
    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.state.lock().writer == Some(thread::current().id())
    }

    /// Number of writers blocked waiting for the lock.
    #[must_use]
    pub fn queued_writers(&self) -> usize {
        self.state.lock().writer_queue.len()
    }

    fn read_inner(&self, deadline: Option<Instant>, interruptible: bool) -> Result<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if interruptible && !state.can_read(me) && interrupt::take_interrupt() {
            return Err(Error::interrupted());
        }
        loop {
            if state.can_read(me) {
                *state.readers.entry(me).or_insert(0) += 1;
                return Ok(true);
            }
            match interrupt::park(&self.cvar, &mut state, deadline, interruptible) {
                Wake::Signalled => {}
                Wake::TimedOut => return Ok(false),
                Wake::Interrupted => return Err(Error::interrupted()),
            }
        }
    }

    fn write_inner(&self, deadline: Option<Instant>, interruptible: bool) -> Result<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            state.write_holds += 1;
            return Ok(true);
        }
        if state.readers.contains_key(&me) {
            return Err(Error::illegal_state(
                "cannot upgrade a read lock to a write lock",
            ));
        }
        if interruptible && interrupt::take_interrupt() {
            return Err(Error::interrupted());
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.writer_queue.push_back(ticket);
        trace!(ticket, readers = state.readers.len(), "writer queued");

        loop {
            if state.can_write(ticket) {
                state.writer_queue.pop_front();
                state.writer = Some(me);
                state.write_holds = 1;
                return Ok(true);
            }
            let wake = interrupt::park(&self.cvar, &mut state, deadline, interruptible);
            if wake == Wake::Signalled {
                continue;
            }
            // Leaving the queue may admit readers or the next writer.
            state.writer_queue.retain(|t| *t != ticket);
            self.cvar.notify_all();
            return match wake {
                Wake::Interrupted => Err(Error::interrupted()),
                _ => Ok(false),
            };
        }
    }
}

/// RAII read hold on a [`ReadWriteLock`].
#[derive(Debug)]
#[must_use = "the read hold is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a ReadWriteLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.read_unlock();
    }
}

/// RAII write hold on a [`ReadWriteLock`].
#[derive(Debug)]
#[must_use = "the write hold is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a ReadWriteLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> WriteGuard<'a> {
    /// Converts the write hold into a read hold without letting a writer in
    /// between.
    pub fn downgrade(self) -> ReadGuard<'a> {
        let lock = self.lock;
        // The write owner is always admitted as a reader.
        lock.read_lock();
        drop(self);
        ReadGuard {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.write_unlock();
    }
}
