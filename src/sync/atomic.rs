//! Lock-free single-value cells.
//!
//! - [`AtomicCounter`]: signed 64-bit counter with CAS, get/set and
//!   increment, the foundation for counters and statistics.
//! - [`AtomicFlag`]: boolean state flag with compare-and-set.
//! - [`AtomicRef`]: shared reference cell whose compare-and-set compares by
//!   identity. Unlike the two above it is guarded by a short internal lock.
//!
//! All operations on the integer and flag cells are sequentially consistent.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// A lock-free signed counter.
#[derive(Default)]
pub struct AtomicCounter {
    value: AtomicI64,
}

impl AtomicCounter {
    /// Creates a counter holding `initial`.
    #[must_use]
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Stores `value`.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Stores `value`, returning the previous value.
    pub fn get_and_set(&self, value: i64) -> i64 {
        self.value.swap(value, Ordering::SeqCst)
    }

    /// Stores `new` if the current value equals `expected`.
    ///
    /// Returns true if the swap happened.
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Adds one and returns the new value.
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    /// Subtracts one and returns the new value.
    pub fn decrement_and_get(&self) -> i64 {
        self.add_and_get(-1)
    }

    /// Adds one and returns the previous value.
    pub fn get_and_increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Adds `delta` (wrapping) and returns the new value.
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }

    /// Applies `f` atomically via a CAS loop and returns the new value.
    ///
    /// `f` may run more than once under contention and must be pure.
    pub fn update_and_get(&self, mut f: impl FnMut(i64) -> i64) -> i64 {
        let mut current = self.get();
        loop {
            let next = f(current);
            match self
                .value
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCounter").field(&self.get()).finish()
    }
}

/// A lock-free boolean flag.
#[derive(Default)]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    /// Creates a flag holding `initial`.
    #[must_use]
    pub const fn new(initial: bool) -> Self {
        Self {
            value: AtomicBool::new(initial),
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    /// Stores `value`.
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Stores `value`, returning the previous value.
    pub fn get_and_set(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::SeqCst)
    }

    /// Stores `new` if the current value equals `expected`.
    pub fn compare_and_set(&self, expected: bool, new: bool) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for AtomicFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicFlag").field(&self.get()).finish()
    }
}

/// A cell holding an `Arc<T>` that can be swapped atomically.
///
/// [`compare_and_set`](Self::compare_and_set) compares by pointer identity,
/// so two equal values in different allocations do not match.
pub struct AtomicRef<T> {
    value: Mutex<Arc<T>>,
}

impl<T> AtomicRef<T> {
    /// Creates a cell holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(Arc::new(initial)),
        }
    }

    /// Returns the current reference.
    #[must_use]
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.value.lock())
    }

    /// Replaces the current reference.
    pub fn set(&self, value: T) {
        *self.value.lock() = Arc::new(value);
    }

    /// Replaces the current reference, returning the previous one.
    pub fn get_and_set(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.value.lock(), Arc::new(value))
    }

    /// Stores `new` if the current reference is `expected`.
    pub fn compare_and_set(&self, expected: &Arc<T>, new: T) -> bool {
        let mut current = self.value.lock();
        if Arc::ptr_eq(&current, expected) {
            *current = Arc::new(new);
            true
        } else {
            false
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicRef").field(&*self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::thread;

    #[test]
    fn counter_concurrent_increments_are_exact() {
        init_test_logging();
        crate::test_phase!("counter_concurrent_increments_are_exact");
        let counter = Arc::new(AtomicCounter::new(0));
        let threads = 8;
        let per_thread = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        counter.increment_and_get();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread failed");
        }

        let total = counter.get();
        crate::assert_with_log!(
            total == threads * per_thread,
            "final count",
            threads * per_thread,
            total
        );
        crate::test_complete!("counter_concurrent_increments_are_exact");
    }

    #[test]
    fn counter_cas_and_update() {
        init_test_logging();
        let counter = AtomicCounter::new(5);
        assert!(!counter.compare_and_set(4, 10));
        assert!(counter.compare_and_set(5, 10));
        assert_eq!(counter.get_and_increment(), 10);
        assert_eq!(counter.decrement_and_get(), 10);
        assert_eq!(counter.update_and_get(|v| v * 3), 30);
        assert_eq!(counter.get_and_set(-1), 30);
        assert_eq!(counter.get(), -1);
    }

    #[test]
    fn flag_single_winner() {
        init_test_logging();
        let flag = Arc::new(AtomicFlag::new(false));
        let winners = Arc::new(AtomicCounter::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let flag = Arc::clone(&flag);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if flag.compare_and_set(false, true) {
                        winners.increment_and_get();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread failed");
        }
        assert!(flag.get());
        assert_eq!(winners.get(), 1);
    }

    #[test]
    fn atomic_ref_compares_identity() {
        init_test_logging();
        let cell = AtomicRef::new(String::from("initial"));
        let snapshot = cell.get();
        let stranger = Arc::new(String::from("initial"));

        assert!(!cell.compare_and_set(&stranger, "nope".into()));
        assert!(cell.compare_and_set(&snapshot, "updated".into()));
        assert!(!cell.compare_and_set(&snapshot, "again".into()));
        assert_eq!(cell.get().as_str(), "updated");
        assert_eq!(cell.get_and_set("last".into()).as_str(), "updated");
    }
}
