//! Error types for deferred-pubsub.
//!
//! All errors are strongly typed using thiserror. Registration errors are
//! returned to the caller; dispatch errors are fatal when raised through the
//! infallible `submit` entry points and only recoverable through the `try_`
//! variants.

use thiserror::Error;

/// Errors raised by the publish/subscribe hub.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The (channel, name) pair is already registered.
    #[error("Subscriber name '{name}' is already taken on channel '{channel}'")]
    DuplicateSubscription {
        /// Channel the subscription was requested on.
        channel: String,
        /// Subscriber name that collided.
        name: String,
    },
}

/// Errors raised by the deferred-call dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The worker queue stayed full for the whole enqueue bound.
    #[error("Deferred call queue '{worker}' still full after {timeout_ms}ms")]
    QueueTimeout {
        /// Worker name (`prefix-pNcM`).
        worker: String,
        /// Enqueue bound that elapsed.
        timeout_ms: u64,
    },

    /// The scheduler could not create the worker for a new key.
    #[error("Cannot create deferred call worker '{worker}': {reason}")]
    SpawnFailed {
        /// Worker name (`prefix-pNcM`).
        worker: String,
        /// Scheduler-provided reason.
        reason: String,
    },

    /// The worker consuming the queue is gone.
    #[error("Deferred call worker '{worker}' is disconnected")]
    Disconnected {
        /// Worker name (`prefix-pNcM`).
        worker: String,
    },
}

/// Top-level error type for deferred-pubsub.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl PubSubError {
    /// Returns true if this is a hub (registration) error.
    #[must_use]
    pub const fn is_hub(&self) -> bool {
        matches!(self, Self::Hub(_))
    }

    /// Returns true if this is a dispatch error.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// Returns true if the process cannot be expected to continue.
    ///
    /// Every dispatch failure signals a stuck worker or a mis-sized queue.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Hub(_) => false,
            Self::Dispatch(_) => true,
        }
    }
}

/// Result type alias for deferred-pubsub operations.
pub type PubSubResult<T> = Result<T, PubSubError>;
