//! A transforming stage between a publisher and its subscribers.

use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::publisher::SubmissionPublisher;
use super::subscription::Subscription;
use super::{Publisher, Subscriber};
use crate::config::FlowConfig;
use crate::error::Error;
use crate::tracing_compat::warn;

/// Subscribes upstream to `T`s and republishes `f(item)` downstream.
///
/// Upstream demand is requested one item at a time, and only after the
/// transformed item was accepted downstream, so a slow downstream
/// subscriber throttles the upstream publisher. Upstream completion and
/// errors are forwarded; a panic in `f` cancels upstream and fails
/// downstream with `Panicked`.
pub struct MapProcessor<T, U> {
    transform: Box<dyn Fn(T) -> U + Send + Sync>,
    upstream: Mutex<Option<Subscription<T>>>,
    downstream: SubmissionPublisher<U>,
}

impl<T, U> MapProcessor<T, U>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
{
    /// Creates a processor applying `f`, with the default downstream buffer.
    #[must_use]
    pub fn new(f: impl Fn(T) -> U + Send + Sync + 'static) -> Arc<Self> {
        Self::with_config(FlowConfig::default(), f)
    }

    /// Creates a processor applying `f` with a custom downstream buffer.
    #[must_use]
    pub fn with_config(config: FlowConfig, f: impl Fn(T) -> U + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            transform: Box::new(f),
            upstream: Mutex::new(None),
            downstream: SubmissionPublisher::with_config(config),
        })
    }

    fn request_upstream(&self) {
        let upstream = self.upstream.lock().clone();
        if let Some(upstream) = upstream {
            upstream.request(1);
        }
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.lock().take() {
            upstream.cancel();
        }
    }
}

impl<T, U> Subscriber<T> for MapProcessor<T, U>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
{
    fn on_subscribe(&self, subscription: Subscription<T>) {
        {
            let mut upstream = self.upstream.lock();
            if upstream.is_some() {
                // Only one upstream at a time.
                subscription.cancel();
                return;
            }
            *upstream = Some(subscription);
        }
        self.request_upstream();
    }

    fn on_next(&self, item: T) {
        let mapped = panic::catch_unwind(AssertUnwindSafe(|| (self.transform)(item)));
        match mapped {
            Ok(value) => match self.downstream.submit(value) {
                Ok(_) => self.request_upstream(),
                Err(e) => {
                    warn!(error = %e, "processor could not forward item; cancelling upstream");
                    self.cancel_upstream();
                }
            },
            Err(payload) => {
                let error = Error::from_panic(payload.as_ref());
                warn!(error = %error, "processor transform panicked");
                self.cancel_upstream();
                self.downstream.close_exceptionally(error);
            }
        }
    }

    fn on_error(&self, error: Error) {
        self.upstream.lock().take();
        self.downstream.close_exceptionally(error);
    }

    fn on_complete(&self) {
        self.upstream.lock().take();
        self.downstream.close();
    }
}

impl<T, U> Publisher<U> for MapProcessor<T, U>
where
    T: Send + 'static,
    U: Clone + Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) {
        self.downstream.subscribe(subscriber);
    }
}

impl<T, U> fmt::Debug for MapProcessor<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapProcessor")
            .field("downstream", &self.downstream)
            .finish_non_exhaustive()
    }
}
