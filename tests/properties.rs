//! Property tests over randomized thread interleavings and inputs.

mod common;

use common::{init_test_logging, test_proptest_config};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use strand::collections::ConcurrentMap;
use strand::forkjoin::{ForkJoinPool, RecursiveTask, WorkerContext};
use strand::sync::{AtomicCounter, Semaphore};
use strand::Result;

struct Sum {
    data: Arc<[i64]>,
    lo: usize,
    hi: usize,
    threshold: usize,
}

impl RecursiveTask for Sum {
    type Output = i64;

    fn compute(self, ctx: &WorkerContext) -> Result<i64> {
        if self.hi - self.lo <= self.threshold {
            return Ok(self.data[self.lo..self.hi].iter().sum());
        }
        let mid = self.lo + (self.hi - self.lo) / 2;
        let left = Self { data: Arc::clone(&self.data), lo: self.lo, hi: mid, threshold: self.threshold };
        let right = ctx.fork(Self { data: self.data, lo: mid, hi: self.hi, threshold: self.threshold });
        let left = left.compute(ctx)?;
        Ok(left + right.join(ctx)?)
    }
}

proptest! {
    #![proptest_config(test_proptest_config(24))]

    #[test]
    fn semaphore_conserves_permits(
        initial in 1usize..8,
        ops in prop::collection::vec(prop::collection::vec(1usize..4, 1..20), 1..5),
    ) {
        init_test_logging();
        let semaphore = Arc::new(Semaphore::new(initial));
        let handles: Vec<_> = ops
            .into_iter()
            .map(|sizes| {
                let semaphore = Arc::clone(&semaphore);
                thread::spawn(move || {
                    for n in sizes {
                        let n = n.min(initial);
                        semaphore.acquire(n).expect("acquire");
                        semaphore.release(n);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker panicked");
        }
        prop_assert_eq!(semaphore.available_permits(), initial);
        prop_assert_eq!(semaphore.queue_length(), 0);
    }

    #[test]
    fn counter_matches_total_increments(per_thread in prop::collection::vec(0u16..500, 1..6)) {
        init_test_logging();
        let counter = Arc::new(AtomicCounter::new(0));
        let expected: i64 = per_thread.iter().map(|&n| i64::from(n)).sum();
        let handles: Vec<_> = per_thread
            .into_iter()
            .map(|n| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..n {
                        counter.increment_and_get();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker panicked");
        }
        prop_assert_eq!(counter.get(), expected);
    }

    #[test]
    fn forkjoin_sum_is_deterministic(
        values in prop::collection::vec(-1000i64..1000, 0..400),
        parallelism in 1usize..5,
        threshold in 1usize..32,
    ) {
        init_test_logging();
        let expected: i64 = values.iter().sum();
        let data: Arc<[i64]> = values.into();
        let pool = ForkJoinPool::new(parallelism);
        let hi = data.len();
        let sum = pool.invoke(Sum { data, lo: 0, hi, threshold }).expect("invoke");
        prop_assert_eq!(sum, expected);
    }

    #[test]
    fn concurrent_merges_count_every_word(
        words in prop::collection::vec(prop::collection::vec(0u8..16, 0..50), 1..5),
    ) {
        init_test_logging();
        let mut expected: HashMap<u8, u64> = HashMap::new();
        for w in words.iter().flatten() {
            *expected.entry(*w).or_default() += 1;
        }
        let map: Arc<ConcurrentMap<u8, u64>> = Arc::new(ConcurrentMap::with_shards(4));
        let handles: Vec<_> = words
            .into_iter()
            .map(|batch| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for w in batch {
                        map.merge(w, 1, |a, b| a + b);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker panicked");
        }
        prop_assert_eq!(map.len(), expected.len());
        for (word, count) in expected {
            prop_assert_eq!(map.get(&word), Some(count));
        }
    }
}
