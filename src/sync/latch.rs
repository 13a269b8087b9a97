//! One-shot countdown latch.
//!
//! A latch starts at `count` and opens once it reaches zero. It never closes
//! again; waits after opening return immediately.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interrupt::{self, Wake};
use crate::tracing_compat::debug;

/// A latch that releases all waiters once counted down to zero.
#[derive(Debug)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl CountDownLatch {
    /// Creates a latch that opens after `count` calls to `count_down`.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cvar: Condvar::new(),
        }
    }

    /// Decrements the count. Calls after the latch opened do nothing.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            debug!("latch opened");
            self.cvar.notify_all();
        }
    }

    /// Returns the remaining count.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until the count reaches zero or the thread is interrupted.
    pub fn wait(&self) -> Result<()> {
        let mut count = self.count.lock();
        while *count > 0 {
            if interrupt::park(&self.cvar, &mut count, None, true) == Wake::Interrupted {
                return Err(Error::interrupted());
            }
        }
        Ok(())
    }

    /// Blocks until the count reaches zero, the thread is interrupted, or
    /// `timeout` elapses. Returns `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = interrupt::deadline_after(Some(timeout));
        let mut count = self.count.lock();
        while *count > 0 {
            match interrupt::park(&self.cvar, &mut count, deadline, true) {
                Wake::Signalled => {}
                Wake::TimedOut => return Ok(false),
                Wake::Interrupted => return Err(Error::interrupted()),
            }
        }
        Ok(true)
    }
}
