//! Demand-driven publish/subscribe streams.
//!
//! A [`Publisher`] pushes items to [`Subscriber`]s, but only as many as each
//! subscriber has asked for through its [`Subscription`]. Signals to a
//! subscriber follow this protocol:
//!
//! ```text
//! on_subscribe (exactly once, first)
//!   on_next*    (never more than the demand requested so far)
//!   [on_complete | on_error]   (at most one, last)
//! ```
//!
//! After `cancel`, or once a terminal signal was delivered, the subscriber
//! receives nothing more.
//!
//! Publishers hold subscribers weakly: the caller keeps a subscriber alive
//! (typically in an `Arc`) for as long as it wants items. A subscription
//! whose subscriber was dropped is cancelled on its next delivery attempt,
//! and a producer blocked on its full buffer is released. A panic in any
//! subscriber callback is logged and ends that subscription only.

mod processor;
mod publisher;
mod subscription;

pub use processor::MapProcessor;
pub use publisher::SubmissionPublisher;
pub use subscription::{Subscription, SubscriptionStatus};

use std::sync::Arc;

use crate::error::Error;

/// Receives items and terminal signals from a [`Publisher`].
///
/// Callbacks for one subscription are never invoked concurrently. They may
/// call back into the subscription (e.g. `request` from `on_next`).
pub trait Subscriber<T>: Send + Sync {
    /// Called once, before any other signal.
    fn on_subscribe(&self, subscription: Subscription<T>);

    /// Called for each delivered item.
    fn on_next(&self, item: T);

    /// Terminal failure.
    fn on_error(&self, error: Error);

    /// Terminal success.
    fn on_complete(&self);
}

/// A source of items for [`Subscriber`]s.
pub trait Publisher<T> {
    /// Registers `subscriber`, which immediately receives `on_subscribe`.
    ///
    /// The publisher keeps only a weak reference to `subscriber`.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}
