//! Derived promises.
//!
//! Each combinator returns a new promise (or, for the timeout helpers, the
//! same one) and never blocks the caller. Value-transforming combinators
//! pass failures and cancellation through unchanged.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use super::{timer, Promise, PromiseState};
use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;

impl<T: Clone + Send + 'static> Promise<T> {
    /// Applies `f` to a successful value.
    ///
    /// If this promise fails or is cancelled, the returned promise fails the
    /// same way or is cancelled too, and `f` never runs.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let next = Promise::new();
        let downstream = next.clone();
        self.on_settle(move |state| match state {
            PromiseState::Completed(v) => {
                let v = v.clone();
                downstream.settle_with(move || Ok(f(v)));
            }
            other => {
                downstream.settle_failure_from(other);
            }
        });
        next
    }

    /// Applies a fallible `f` to a successful value.
    ///
    /// If this promise fails or is cancelled, the returned promise fails the
    /// same way or is cancelled too, and `f` never runs.
    pub fn and_then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let next = Promise::new();
        let downstream = next.clone();
        self.on_settle(move |state| match state {
            PromiseState::Completed(v) => {
                let v = v.clone();
                downstream.settle_with(move || f(v));
            }
            other => {
                downstream.settle_failure_from(other);
            }
        });
        next
    }

    /// Applies `f` to a successful value on `executor` instead of the
    /// settling thread.
    pub fn map_async<U, F>(&self, executor: &impl AsRef<ExecutorHandle>, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let next = Promise::new();
        let downstream = next.clone();
        let executor = executor.as_ref().clone();
        self.on_settle(move |state| match state {
            PromiseState::Completed(v) => {
                let v = v.clone();
                let runner = downstream.clone();
                let canceller = downstream.clone();
                let dispatched = executor.dispatch(
                    move || runner.run(move || Ok(f(v))),
                    move || {
                        canceller.cancel(false);
                    },
                );
                if let Err(e) = dispatched {
                    downstream.fail(e);
                }
            }
            other => {
                downstream.settle_failure_from(other);
            }
        });
        next
    }

    /// Chains to the promise returned by `f`.
    pub fn then_compose<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let next = Promise::new();
        let downstream = next.clone();
        self.on_settle(move |state| match state {
            PromiseState::Completed(v) => {
                let v = v.clone();
                match panic::catch_unwind(AssertUnwindSafe(move || f(v))) {
                    Ok(inner) => inner.on_settle(move |inner_state| match inner_state {
                        PromiseState::Completed(u) => {
                            downstream.complete(u.clone());
                        }
                        other => {
                            downstream.settle_failure_from(other);
                        }
                    }),
                    Err(payload) => {
                        downstream.fail(Error::from_panic(payload.as_ref()));
                    }
                }
            }
            other => {
                downstream.settle_failure_from(other);
            }
        });
        next
    }

    /// Waits for both promises and combines their values.
    ///
    /// Fails if either fails.
    pub fn combine<U, R, F>(&self, other: &Promise<U>, f: F) -> Promise<R>
    where
        U: Clone + Send + 'static,
        R: Clone + Send + 'static,
        F: FnOnce(T, U) -> R + Send + 'static,
    {
        let other = other.clone();
        self.then_compose(move |a| other.map(move |b| f(a, b)))
    }

    /// Converts a failure (or cancellation) into a value.
    pub fn recover<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        let next = Self::new();
        let downstream = next.clone();
        self.on_settle(move |state| match state {
            PromiseState::Completed(v) => {
                downstream.complete(v.clone());
            }
            other => {
                let error = other.failure().unwrap_or_else(Error::cancelled);
                downstream.settle_with(move || Ok(f(error)));
            }
        });
        next
    }

    /// Observes the outcome without altering it.
    ///
    /// The returned promise mirrors this one, except that a panic in `f`
    /// fails it when this one completed successfully.
    pub fn when_complete<F>(&self, f: F) -> Self
    where
        F: FnOnce(std::result::Result<&T, &Error>) + Send + 'static,
    {
        let next = Self::new();
        let downstream = next.clone();
        self.on_settle(move |state| {
            let failure = state.failure();
            let observed = match (state, &failure) {
                (PromiseState::Completed(v), _) => Ok(v),
                (_, Some(e)) => Err(e),
                (_, None) => return,
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || f(observed)));
            match (state, outcome) {
                (PromiseState::Completed(v), Ok(())) => {
                    downstream.complete(v.clone());
                }
                (PromiseState::Completed(_), Err(payload)) => {
                    downstream.fail(Error::from_panic(payload.as_ref()));
                }
                (other, _) => {
                    downstream.settle_failure_from(other);
                }
            }
        });
        next
    }

    /// Consumes a successful value.
    pub fn then_accept<F>(&self, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.map(f)
    }

    /// Completes this promise with `value` if it is still pending after
    /// `timeout`. The computation behind it keeps running.
    pub fn complete_on_timeout(&self, value: T, timeout: Duration) -> Self {
        let target = self.clone();
        timer::schedule(timeout, move || {
            target.complete(value);
        });
        self.clone()
    }

    /// Fails this promise with `Timeout` if it is still pending after
    /// `timeout`.
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        let target = self.clone();
        timer::schedule(timeout, move || {
            target.fail(Error::timeout(timeout));
        });
        self.clone()
    }
}

struct Gather<T> {
    remaining: usize,
    slots: Vec<Option<PromiseState<T>>>,
}

/// Completes with every value, in input order, once all inputs have settled.
///
/// Fails with the first failure in input order if any input failed or was
/// cancelled. An empty input completes immediately with an empty vector.
pub fn all_of<T: Clone + Send + 'static>(promises: &[Promise<T>]) -> Promise<Vec<T>> {
    let result = Promise::new();
    if promises.is_empty() {
        result.complete(Vec::new());
        return result;
    }

    let gather = Arc::new(Mutex::new(Gather {
        remaining: promises.len(),
        slots: (0..promises.len()).map(|_| None).collect(),
    }));
    for (index, promise) in promises.iter().enumerate() {
        let gather = Arc::clone(&gather);
        let result = result.clone();
        promise.on_settle(move |state| {
            let slots = {
                let mut g = gather.lock();
                g.slots[index] = Some(state.clone());
                g.remaining -= 1;
                if g.remaining > 0 {
                    return;
                }
                std::mem::take(&mut g.slots)
            };
            let mut values = Vec::with_capacity(slots.len());
            for state in slots.into_iter().flatten() {
                match state {
                    PromiseState::Completed(v) => values.push(v),
                    other => {
                        result.fail(other.failure().unwrap_or_else(Error::cancelled));
                        return;
                    }
                }
            }
            result.complete(values);
        });
    }
    result
}

/// Settles with the first outcome among `promises`, success or failure.
///
/// An empty input fails with `InvalidArgument`.
pub fn any_of<T: Clone + Send + 'static>(promises: &[Promise<T>]) -> Promise<T> {
    let result = Promise::new();
    if promises.is_empty() {
        result.fail(Error::invalid_argument("any_of requires at least one promise"));
        return result;
    }
    for promise in promises {
        let result = result.clone();
        promise.on_settle(move |state| match state {
            PromiseState::Completed(v) => {
                result.complete(v.clone());
            }
            other => {
                result.settle_failure_from(other);
            }
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::ErrorKind;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn map_chains_and_propagates_failure() {
        init_test("map_chains_and_propagates_failure");
        let source = Promise::new();
        let doubled = source.map(|v: i32| v * 2).map(|v| v + 1);
        assert!(!doubled.is_done());
        source.complete(20);
        assert_eq!(doubled.get(), Ok(41));

        let failing: Promise<i32> = Promise::failed(Error::user("bad input"));
        let mapped = failing.map(|v| v * 2);
        let err = mapped.get().expect_err("failure propagates");
        assert_eq!(err.cause().map(Error::kind), Some(ErrorKind::User));
        crate::test_complete!("map_chains_and_propagates_failure");
    }

    #[test]
    fn and_then_can_fail() {
        init_test("and_then_can_fail");
        let p = Promise::completed(3).and_then(|v: i32| {
            if v > 2 {
                Err(Error::user("too big"))
            } else {
                Ok(v)
            }
        });
        assert_eq!(p.get().map_err(|e| e.root_kind()), Err(ErrorKind::User));
    }

    #[test]
    fn compose_and_combine() {
        init_test("compose_and_combine");
        let a = Promise::new();
        let b = Promise::new();
        let sum = a.combine(&b, |x: u32, y: u32| x + y);
        let composed = a.then_compose(|x| Promise::completed(format!("x={x}")));
        b.complete(2);
        assert!(!sum.is_done());
        a.complete(40);
        assert_eq!(sum.get(), Ok(42));
        assert_eq!(composed.get().as_deref(), Ok("x=40"));

        let c: Promise<u32> = Promise::new();
        let d: Promise<u32> = Promise::failed(Error::user("d failed"));
        let combined = c.combine(&d, |x, y| x + y);
        c.complete(1);
        assert_eq!(combined.get().map_err(|e| e.root_kind()), Err(ErrorKind::User));
    }

    #[test]
    fn recover_and_cancel_propagation() {
        init_test("recover_and_cancel_propagation");
        let failed: Promise<String> = Promise::failed(Error::user("nope"));
        let recovered = failed.recover(|e| format!("recovered from {}", e.message().unwrap_or("")));
        assert_eq!(recovered.get().as_deref(), Ok("recovered from nope"));

        let source: Promise<u8> = Promise::new();
        let mapped = source.map(|v| v + 1);
        let rescued = source.recover(|e| if e.is_cancelled() { 0 } else { 1 });
        source.cancel(false);
        assert!(mapped.is_cancelled());
        assert_eq!(rescued.get(), Ok(0));
    }

    #[test]
    fn when_complete_observes_without_altering() {
        init_test("when_complete_observes_without_altering");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ok = {
            let seen = Arc::clone(&seen);
            Promise::completed(5).when_complete(move |r| seen.lock().push(r.map(|v| *v).ok()))
        };
        let err = {
            let seen = Arc::clone(&seen);
            Promise::<i32>::failed(Error::user("x"))
                .when_complete(move |r| seen.lock().push(r.map(|v| *v).ok()))
        };
        assert_eq!(ok.get(), Ok(5));
        assert_eq!(err.get().map_err(|e| e.root_kind()), Err(ErrorKind::User));
        assert_eq!(*seen.lock(), vec![Some(5), None]);

        let exploding = Promise::completed(1).when_complete(|_| panic!("observer"));
        assert_eq!(exploding.get().map_err(|e| e.root_kind()), Err(ErrorKind::Panicked));
    }

    #[test]
    fn derived_promises_of_cancelled_source_are_cancelled() {
        init_test("derived_promises_of_cancelled_source_are_cancelled");
        let source: Promise<i32> = Promise::new();
        let mapped = source.map(|v| v + 1);
        let chained = source.and_then(|v| Ok(v * 2));
        assert!(source.cancel(false));
        for derived in [&mapped, &chained] {
            let cancelled = derived.is_cancelled();
            crate::assert_with_log!(cancelled, "derived promise cancelled", true, cancelled);
            assert_eq!(derived.get().map_err(|e| e.kind()), Err(ErrorKind::Cancelled));
        }
        crate::test_complete!("derived_promises_of_cancelled_source_are_cancelled");
    }

    #[test]
    fn timeouts_settle_pending_promises() {
        init_test("timeouts_settle_pending_promises");
        let slow: Promise<&'static str> = Promise::new();
        let defaulted = slow.complete_on_timeout("default", Duration::from_millis(20));
        assert_eq!(defaulted.get(), Ok("default"));
        assert!(!slow.complete("late"));

        let slower: Promise<u8> = Promise::new();
        let err = slower
            .or_timeout(Duration::from_millis(20))
            .get()
            .expect_err("timed out");
        assert_eq!(err.root_kind(), ErrorKind::Timeout);

        let fast = Promise::completed(7).or_timeout(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fast.get(), Ok(7));
    }

    #[test]
    fn all_of_waits_for_every_input() {
        init_test("all_of_waits_for_every_input");
        let inputs: Vec<Promise<u32>> = (0..3).map(|_| Promise::new()).collect();
        let all = all_of(&inputs);
        inputs[2].complete(3);
        inputs[0].complete(1);
        assert!(!all.is_done());
        inputs[1].complete(2);
        assert_eq!(all.get(), Ok(vec![1, 2, 3]));

        let mixed: Vec<Promise<u32>> = (0..3).map(|_| Promise::new()).collect();
        let all = all_of(&mixed);
        mixed[1].fail(Error::user("second"));
        assert!(!all.is_done(), "all_of settled before every input was terminal");
        mixed[0].complete(1);
        mixed[2].complete(3);
        assert_eq!(all.get().map_err(|e| e.root_kind()), Err(ErrorKind::User));

        assert_eq!(all_of::<u8>(&[]).get(), Ok(Vec::new()));
    }

    #[test]
    fn any_of_takes_first_outcome() {
        init_test("any_of_takes_first_outcome");
        let inputs: Vec<Promise<u32>> = (0..3).map(|_| Promise::new()).collect();
        let first = any_of(&inputs);
        inputs[1].fail(Error::user("first to finish"));
        inputs[0].complete(1);
        assert_eq!(first.get().map_err(|e| e.root_kind()), Err(ErrorKind::User));

        let inputs: Vec<Promise<u32>> = (0..2).map(|_| Promise::new()).collect();
        let first = any_of(&inputs);
        inputs[0].complete(10);
        assert_eq!(first.get(), Ok(10));

        let empty = any_of::<u8>(&[]);
        assert_eq!(empty.get().map_err(|e| e.root_kind()), Err(ErrorKind::InvalidArgument));
    }

    #[test]
    fn executor_backed_stages() {
        init_test("executor_backed_stages");
        let pool = crate::executor::ThreadPoolExecutor::fixed(2);
        let supplied = Promise::supply_async(&pool, || Ok(String::from("strand"))).expect("submit");
        let on_pool = supplied.map_async(&pool, |s| {
            let worker = std::thread::current().name().map(str::to_owned);
            (s.len(), worker)
        });
        let (len, worker) = on_pool.get().expect("map_async");
        assert_eq!(len, 6);
        assert!(worker.is_some_and(|n| n.starts_with("strand-pool-")));

        let ran = Arc::new(crate::sync::AtomicFlag::new(false));
        let side_effect = {
            let ran = Arc::clone(&ran);
            Promise::run_async(&pool.handle(), move || {
                ran.set(true);
                Ok(())
            })
            .expect("submit")
        };
        assert_eq!(side_effect.get(), Ok(()));
        assert!(ran.get());

        pool.shutdown();
        let late = supplied.map_async(&pool, |s| s.len());
        assert_eq!(late.get().map_err(|e| e.root_kind()), Err(ErrorKind::Rejected));
        crate::test_complete!("executor_backed_stages");
    }
}
