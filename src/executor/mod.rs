//! Thread-pool task execution.
//!
//! A [`ThreadPoolExecutor`] owns a fixed set of worker threads that pull
//! units of work from a shared FIFO [`TaskQueue`]. Work is submitted either
//! fire-and-forget ([`execute`](ThreadPoolExecutor::execute)) or with a
//! [`Promise`](crate::promise::Promise) for the result
//! ([`submit`](ThreadPoolExecutor::submit)).
//!
//! There is no process-wide pool: callers construct an executor and share it
//! (or a cloned [`ExecutorHandle`]) explicitly.
//!
//! # Example
//!
//! ```
//! use strand::executor::ThreadPoolExecutor;
//!
//! let pool = ThreadPoolExecutor::fixed(2);
//! let answer = pool.submit(|| Ok(40 + 2)).unwrap();
//! assert_eq!(answer.get().unwrap(), 42);
//! pool.shutdown();
//! ```

mod builder;
mod pool;
mod queue;

pub use builder::ExecutorBuilder;
pub use pool::{ExecutorHandle, ThreadPoolExecutor};
pub use queue::TaskQueue;
