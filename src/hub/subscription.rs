use std::fmt;
use std::sync::Arc;

use crate::scheduler::{Affinity, Priority};

/// Shared handler invoked with one published message.
pub type Handler<M> = Arc<dyn Fn(M) + Send + Sync + 'static>;

/// How a subscriber receives a regular publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// In-line, on the publisher's stack, before publish returns.
    #[default]
    Sync,
    /// Always through the dispatcher, on the subscriber's (priority, affinity) worker.
    Async,
}

/// One handler registered on one channel.
pub(crate) struct Subscription<M> {
    pub handler: Handler<M>,
    pub priority: Priority,
    pub affinity: Affinity,
    pub mode: DeliveryMode,
}

impl<M> Subscription<M> {
    pub fn info(&self, name: &str) -> SubscriptionInfo {
        SubscriptionInfo {
            name: name.to_string(),
            priority: self.priority,
            affinity: self.affinity,
            mode: self.mode,
        }
    }
}

impl<M> Clone for Subscription<M> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            priority: self.priority,
            affinity: self.affinity,
            mode: self.mode,
        }
    }
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("priority", &self.priority)
            .field("affinity", &self.affinity)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Read-only description of a registered subscriber.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub name: String,
    pub priority: Priority,
    pub affinity: Affinity,
    pub mode: DeliveryMode,
}

/// Options for [`Hub::subscribe_with`](super::Hub::subscribe_with).
///
/// Unset priority and affinity are taken from the subscribing context when
/// subscribe is called. An unset name is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    #[allow(missing_docs)]
    pub name: Option<String>,
    #[allow(missing_docs)]
    pub priority: Option<Priority>,
    #[allow(missing_docs)]
    pub affinity: Option<Affinity>,
    #[allow(missing_docs)]
    pub mode: DeliveryMode,
}

impl SubscribeOptions {
    /// In-line delivery.
    #[must_use]
    pub fn sync() -> Self {
        Self::default()
    }

    /// Delivery through the dispatcher.
    #[must_use]
    pub fn asynchronous() -> Self {
        Self {
            mode: DeliveryMode::Async,
            ..Self::default()
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }
}
