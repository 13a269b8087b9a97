//! Multicasting publisher with per-subscriber buffers.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use super::subscription::{Subscription, SubscriptionState};
use super::{Publisher, Subscriber};
use crate::config::FlowConfig;
use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;
use crate::tracing_compat::debug;

enum Closed {
    Open,
    Completed,
    Failed(Error),
}

struct Registry<T> {
    subscriptions: Vec<Arc<SubscriptionState<T>>>,
    closed: Closed,
}

/// A [`Publisher`] that pushes submitted items to every current subscriber,
/// honouring each subscriber's own demand.
///
/// Every subscriber gets a buffer of [`FlowConfig::buffer_capacity`] items.
/// [`submit`](Self::submit) blocks while any subscriber's buffer is full;
/// that is the backpressure. [`offer`](Self::offer) never blocks and drops
/// the item for subscribers that have no room.
///
/// Signals are delivered on the thread that made them deliverable (the
/// submitting thread, or the subscriber thread calling `request`), or on an
/// executor when built with [`with_executor`](Self::with_executor).
pub struct SubmissionPublisher<T> {
    config: FlowConfig,
    executor: Option<ExecutorHandle>,
    registry: Mutex<Registry<T>>,
}

impl<T: Clone + Send + 'static> SubmissionPublisher<T> {
    /// Creates a publisher that delivers inline with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    /// Creates a publisher that delivers inline.
    #[must_use]
    pub fn with_config(config: FlowConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a publisher whose signals are delivered by tasks on `executor`.
    ///
    /// Falls back to inline delivery if the executor rejects a task.
    #[must_use]
    pub fn with_executor(executor: &impl AsRef<ExecutorHandle>, config: FlowConfig) -> Self {
        Self::build(config, Some(executor.as_ref().clone()))
    }

    fn build(config: FlowConfig, executor: Option<ExecutorHandle>) -> Self {
        Self {
            config: FlowConfig {
                buffer_capacity: config.buffer_capacity.max(1),
            },
            executor,
            registry: Mutex::new(Registry {
                subscriptions: Vec::new(),
                closed: Closed::Open,
            }),
        }
    }

    /// Snapshot of the open subscriptions, pruning finished ones.
    fn open_subscriptions(&self) -> Result<Vec<Arc<SubscriptionState<T>>>> {
        let mut registry = self.registry.lock();
        if !matches!(registry.closed, Closed::Open) {
            return Err(Error::illegal_state("publisher is closed"));
        }
        registry.subscriptions.retain(|s| s.is_open());
        Ok(registry.subscriptions.clone())
    }

    /// Delivers `item` to every subscriber, blocking while any of their
    /// buffers is full.
    ///
    /// Returns the estimated maximum lag afterwards. Fails with
    /// `IllegalState` once closed, or `Interrupted` if interrupted while
    /// blocked.
    pub fn submit(&self, item: T) -> Result<usize> {
        for subscription in self.open_subscriptions()? {
            subscription.push(item.clone())?;
        }
        Ok(self.estimated_max_lag())
    }

    /// Delivers `item` to every subscriber with buffer space, without
    /// blocking.
    ///
    /// Returns false if at least one subscriber dropped the item.
    pub fn offer(&self, item: T) -> Result<bool> {
        let mut all = true;
        for subscription in self.open_subscriptions()? {
            all &= subscription.offer(item.clone());
        }
        Ok(all)
    }

    /// Completes every subscriber once it has received its buffered items.
    /// Later submissions fail. Idempotent.
    pub fn close(&self) {
        let subscriptions = {
            let mut registry = self.registry.lock();
            if !matches!(registry.closed, Closed::Open) {
                return;
            }
            registry.closed = Closed::Completed;
            std::mem::take(&mut registry.subscriptions)
        };
        debug!(subscribers = subscriptions.len(), "publisher closed");
        for subscription in subscriptions {
            subscription.complete();
        }
    }

    /// Fails every subscriber with `error`, discarding buffered items.
    pub fn close_exceptionally(&self, error: Error) {
        let subscriptions = {
            let mut registry = self.registry.lock();
            if !matches!(registry.closed, Closed::Open) {
                return;
            }
            registry.closed = Closed::Failed(error.clone());
            std::mem::take(&mut registry.subscriptions)
        };
        debug!(subscribers = subscriptions.len(), error = %error, "publisher closed exceptionally");
        for subscription in subscriptions {
            subscription.error(error.clone());
        }
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !matches!(self.registry.lock().closed, Closed::Open)
    }

    /// The error passed to [`close_exceptionally`](Self::close_exceptionally).
    #[must_use]
    pub fn closed_exception(&self) -> Option<Error> {
        match &self.registry.lock().closed {
            Closed::Failed(e) => Some(e.clone()),
            Closed::Open | Closed::Completed => None,
        }
    }

    /// Number of subscriptions still receiving items.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.is_open())
            .count()
    }

    /// Largest number of items buffered for any one subscriber.
    #[must_use]
    pub fn estimated_max_lag(&self) -> usize {
        self.registry
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.lag())
            .max()
            .unwrap_or(0)
    }

    /// Buffer capacity per subscriber.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.config.buffer_capacity
    }
}

impl<T: Clone + Send + 'static> Publisher<T> for SubmissionPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let state = SubscriptionState::new(&subscriber, self.config.buffer_capacity, self.executor.clone());
        let terminal = {
            let mut registry = self.registry.lock();
            match &registry.closed {
                Closed::Open => {
                    registry.subscriptions.push(Arc::clone(&state));
                    None
                }
                Closed::Completed => Some(None),
                Closed::Failed(e) => Some(Some(e.clone())),
            }
        };
        match terminal {
            None => {}
            Some(None) => state.complete(),
            Some(Some(e)) => state.error(e),
        }
        subscriber.on_subscribe(Subscription::new(Arc::clone(&state)));
        state.start();
    }
}

impl<T: Clone + Send + 'static> Default for SubmissionPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SubmissionPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("SubmissionPublisher")
            .field("buffer_capacity", &self.config.buffer_capacity)
            .field("subscriptions", &registry.subscriptions.len())
            .field("closed", &!matches!(registry.closed, Closed::Open))
            .field("executor", &self.executor.is_some())
            .finish()
    }
}
