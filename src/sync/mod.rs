//! Blocking synchronization primitives.
//!
//! Every primitive here is safe to share between any number of threads and
//! keeps its state behind a single internal lock plus condition variable,
//! except the atomic cells, which are lock-free.
//!
//! # Primitives
//!
//! - [`AtomicCounter`], [`AtomicFlag`], [`AtomicRef`]: single-value cells
//! - [`ReentrantLock`]: owner-tracked mutual exclusion, fair or barging
//! - [`Condition`]: wait/signal bound to a [`ReentrantLock`]
//! - [`ReadWriteLock`]: writer-preferring shared/exclusive lock
//! - [`Semaphore`]: counting permits, fair or barging
//! - [`CountDownLatch`]: one-shot gate
//! - [`CyclicBarrier`]: reusable N-party rendezvous with a trip action
//! - [`Phaser`]: reusable barrier with dynamic registration
//!
//! # Blocking and interruption
//!
//! Blocking calls genuinely block the calling thread. Calls documented as
//! interruptible fail with [`ErrorKind::Interrupted`](crate::ErrorKind) when
//! the thread is interrupted through an
//! [`InterruptHandle`](crate::interrupt::InterruptHandle); timed variants
//! stop waiting at the deadline but never take back what another party was
//! already granted.

mod atomic;
mod barrier;
mod condition;
mod latch;
mod lock;
mod phaser;
mod rwlock;
mod semaphore;

pub use atomic::{AtomicCounter, AtomicFlag, AtomicRef};
pub use barrier::CyclicBarrier;
pub use condition::Condition;
pub use latch::CountDownLatch;
pub use lock::{LockGuard, LockOptions, ReentrantLock};
pub use phaser::Phaser;
pub use rwlock::{ReadGuard, ReadWriteLock, WriteGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
