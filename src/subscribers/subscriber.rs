//! The [`Subscribe`] trait and the sequential fan-out set.

use std::sync::Arc;

use async_trait::async_trait;

use crate::events::Event;

/// Receives supervisor events.
///
/// Handlers run on the supervisor's control thread and are awaited before the
/// next event is processed, so they must be short relative to the
/// reconciliation interval.
#[async_trait]
pub trait Subscribe: Send + Sync {
    /// Handles one event.
    async fn on_event(&self, event: &Event);
}

/// Ordered fan-out over a fixed set of subscribers.
///
/// Subscribers are invoked one after another, in registration order, for each
/// event. There are no queues and no spawned workers: the supervisor is
/// single-threaded by design, and this keeps delivery order identical to
/// emission order.
#[derive(Default)]
pub struct SubscriberSet {
    subs: Vec<Arc<dyn Subscribe>>,
}

impl SubscriberSet {
    /// Creates a set from the given subscribers.
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self { subs }
    }

    /// Delivers `event` to every subscriber, in registration order.
    pub async fn emit(&self, event: &Event) {
        for sub in &self.subs {
            sub.on_event(event).await;
        }
    }
}
