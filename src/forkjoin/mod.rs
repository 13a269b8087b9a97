//! Work-stealing fork/join scheduling.
//!
//! A [`ForkJoinPool`] runs [`RecursiveTask`]s. Inside `compute`, a task uses
//! its [`WorkerContext`] to [`fork`](WorkerContext::fork) subtasks onto the
//! current worker's deque and [`join`](ForkHandle::join) them later. Forks
//! never block. A join that finds its subtask unfinished runs other pending
//! work in the meantime (possibly the subtask itself), so a pool with a
//! single worker still completes arbitrarily deep recursions.
//!
//! Failures travel up the join chain: an error or panic in a subtask is
//! returned from its `join`, and `?` carries it to the enclosing task and
//! finally to [`ForkJoinPool::invoke`].
//!
//! ```
//! use strand::forkjoin::{ForkJoinPool, RecursiveTask, WorkerContext};
//!
//! struct Fib(u32);
//!
//! impl RecursiveTask for Fib {
//!     type Output = u64;
//!     fn compute(self, ctx: &WorkerContext) -> strand::Result<u64> {
//!         if self.0 < 2 {
//!             return Ok(u64::from(self.0));
//!         }
//!         let (a, b) = ctx.join2(Fib(self.0 - 1), Fib(self.0 - 2))?;
//!         Ok(a + b)
//!     }
//! }
//!
//! let pool = ForkJoinPool::new(2);
//! assert_eq!(pool.invoke(Fib(15)).unwrap(), 610);
//! ```

mod deque;
mod pool;
mod stealing;
mod task;
mod worker;

pub use pool::{ForkJoinBuilder, ForkJoinPool};
pub use task::{ForkHandle, RecursiveTask};
pub use worker::WorkerContext;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind, Result};
    use crate::test_utils::init_test_logging;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    struct SumTask {
        data: Arc<[u64]>,
        lo: usize,
        hi: usize,
    }

    impl RecursiveTask for SumTask {
        type Output = u64;

        fn compute(self, ctx: &WorkerContext) -> Result<u64> {
            if self.hi - self.lo <= 10 {
                return Ok(self.data[self.lo..self.hi].iter().sum());
            }
            let mid = self.lo + (self.hi - self.lo) / 2;
            let left = SumTask { data: Arc::clone(&self.data), lo: self.lo, hi: mid };
            let right = SumTask { data: self.data, lo: mid, hi: self.hi };
            let right = ctx.fork(right);
            let left = left.compute(ctx)?;
            Ok(left + right.join(ctx)?)
        }
    }

    fn one_to_hundred() -> SumTask {
        let data: Arc<[u64]> = (1..=100).collect();
        SumTask { data, lo: 0, hi: 100 }
    }

    #[test]
    fn sum_is_independent_of_parallelism() {
        init_test("sum_is_independent_of_parallelism");
        for parallelism in 1..=4 {
            let pool = ForkJoinPool::new(parallelism);
            let sum = pool.invoke(one_to_hundred()).expect("invoke");
            crate::assert_with_log!(sum == 5050, "sum", 5050, sum);
            assert_eq!(pool.parallelism(), parallelism);
        }
        crate::test_complete!("sum_is_independent_of_parallelism");
    }

    struct Faulty {
        depth: u32,
        panic: bool,
    }

    impl RecursiveTask for Faulty {
        type Output = ();

        fn compute(self, ctx: &WorkerContext) -> Result<()> {
            if self.depth == 0 {
                if self.panic {
                    panic!("leaf exploded");
                }
                return Err(Error::user("leaf failed"));
            }
            let healthy = ctx.fork(Sleepy(Duration::from_millis(1)));
            let faulty = ctx.fork(Faulty { depth: self.depth - 1, panic: self.panic });
            healthy.join(ctx)?;
            faulty.join(ctx)
        }
    }

    struct Sleepy(Duration);

    impl RecursiveTask for Sleepy {
        type Output = ();

        fn compute(self, _ctx: &WorkerContext) -> Result<()> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    #[test]
    fn subtask_failures_reach_invoke() {
        init_test("subtask_failures_reach_invoke");
        let pool = ForkJoinPool::new(3);
        let err = pool.invoke(Faulty { depth: 4, panic: false }).expect_err("leaf error");
        assert_eq!(err.kind(), ErrorKind::User);
        let err = pool.invoke(Faulty { depth: 4, panic: true }).expect_err("leaf panic");
        assert_eq!(err.kind(), ErrorKind::Panicked);
        // The pool survives both.
        assert_eq!(pool.invoke(one_to_hundred()), Ok(5050));
    }

    struct Spread {
        leaves: usize,
        seen: Arc<Mutex<HashSet<usize>>>,
    }

    impl RecursiveTask for Spread {
        type Output = usize;

        fn compute(self, ctx: &WorkerContext) -> Result<usize> {
            if self.leaves == 1 {
                self.seen.lock().insert(ctx.worker_index());
                std::thread::sleep(Duration::from_millis(2));
                return Ok(1);
            }
            let half = self.leaves / 2;
            let (a, b) = ctx.join2(
                Spread { leaves: half, seen: Arc::clone(&self.seen) },
                Spread { leaves: self.leaves - half, seen: self.seen },
            )?;
            Ok(a + b)
        }
    }

    #[test]
    fn idle_workers_steal() {
        init_test("idle_workers_steal");
        let pool = ForkJoinPool::builder().parallelism(4).steal_seed(7).build().expect("build");
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let leaves = pool
            .invoke(Spread { leaves: 64, seen: Arc::clone(&seen) })
            .expect("invoke");
        assert_eq!(leaves, 64);
        let workers = seen.lock().len();
        assert!(workers > 1, "only {workers} worker(s) ran leaves");
        assert!(pool.steal_count() > 0);
    }

    #[test]
    fn submit_and_shutdown() {
        init_test("submit_and_shutdown");
        let pool = ForkJoinPool::builder()
            .parallelism(2)
            .thread_name_prefix("fj-test")
            .build()
            .expect("build");
        let promise = pool.submit(one_to_hundred()).expect("submit");
        assert_eq!(promise.get(), Ok(5050));
        pool.shutdown();
        let err = pool.invoke(one_to_hundred()).expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(pool.await_termination(Duration::from_secs(2)));
    }

    #[test]
    fn builder_validates() {
        init_test("builder_validates");
        assert!(ForkJoinPool::builder().parallelism(0).build().is_err());
    }

    #[test]
    fn try_new_rejects_zero_parallelism() {
        init_test("try_new_rejects_zero_parallelism");
        let err = ForkJoinPool::try_new(0).expect_err("zero parallelism");
        assert!(matches!(
            err,
            crate::config::ConfigError::InvalidValue { field: "parallelism", .. }
        ));
        let pool = ForkJoinPool::try_new(2).expect("valid parallelism");
        assert_eq!(pool.invoke(one_to_hundred()), Ok(5050));
        crate::test_complete!("try_new_rejects_zero_parallelism");
    }
}
