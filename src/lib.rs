//! Strand: thread-based concurrency primitives with explicit semantics.
//!
//! # Overview
//!
//! Strand provides the building blocks for coordinating OS threads inside one
//! process: mutual exclusion, condition waiting, counting and latching,
//! party rendezvous, thread-pool execution with composable promises,
//! work-stealing fork/join, and demand-driven streams. Blocking operations
//! genuinely block the calling thread; there is no event loop.
//!
//! # Core Guarantees
//!
//! - **Explicit ownership**: only the owner may release a lock or signal its
//!   conditions; violations fail with `NotOwner`
//! - **Opt-in fairness**: fair modes grant in arrival order; default modes
//!   allow barging and make no ordering promise
//! - **Single assignment**: a promise settles once; every observer sees the
//!   identical outcome
//! - **Cooperative cancellation**: interrupts and `cancel(true)` set a flag
//!   that blocking calls and task code observe; no thread is ever killed
//! - **No lost failures**: task errors and panics are stored in the task's
//!   promise or join chain and surface when observed
//! - **Bounded demand**: a stream never delivers more items than requested
//!
//! # Module Structure
//!
//! - [`sync`]: atomics, reentrant lock, condition, RW lock, semaphore, latch,
//!   barrier, phaser
//! - [`collections`]: sharded concurrent map with atomic per-key updates
//! - [`executor`]: task queue and fixed thread pool
//! - [`promise`]: single-assignment results and their combinators
//! - [`forkjoin`]: work-stealing divide-and-conquer pool
//! - [`flow`]: backpressured publish/subscribe
//! - [`interrupt`]: per-thread cooperative interruption
//! - [`config`]: construction-time configuration and environment overrides
//! - [`error`]: error types
//! - [`util`]: deterministic RNG for steal-victim selection

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod collections;
pub mod config;
pub mod error;
pub mod executor;
pub mod flow;
pub mod forkjoin;
pub mod interrupt;
pub mod promise;
pub mod sync;
pub mod tracing_compat;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ConfigError, ExecutorConfig, FlowConfig, ForkJoinConfig, FullQueuePolicy};
pub use error::{Error, ErrorCategory, ErrorKind, PanicError, Result, ResultExt};
pub use executor::{ExecutorHandle, ThreadPoolExecutor};
pub use forkjoin::{ForkJoinPool, RecursiveTask, WorkerContext};
pub use interrupt::InterruptHandle;
pub use promise::{Promise, PromiseState};
