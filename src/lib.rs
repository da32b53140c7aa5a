//! # deferred-pubsub - Reentrant in-process publish/subscribe
//!
//! In-process messaging for multitasking targets, built from two parts:
//!
//! - **Dispatcher**: runs deferred calls on dedicated workers, one per
//!   (priority, affinity) key, each draining a bounded FIFO queue
//! - **Hub**: routes messages published on named channels to subscribers,
//!   either in-line on the publisher's stack or through the dispatcher
//!
//! The hub is reentrant: handlers may publish, subscribe, unsubscribe or
//! clear while a publish is invoking them. Calls that find the channel table
//! busy are queued and replayed in order once the table is free.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use deferred_pubsub::{Dispatcher, Hub};
//!
//! let hub: Arc<Hub<u32>> = Hub::global();
//!
//! hub.subscribe_sync("temperature", |celsius| println!("now {celsius}C"));
//! hub.subscribe_async_with_priority("temperature", |celsius| {
//!     // runs later on the priority 0 worker
//!     let _ = celsius;
//! }, 0);
//!
//! hub.publish("temperature", 21);
//!
//! // Plain deferred calls without the hub.
//! Dispatcher::global().submit(|| println!("later"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Ports and configuration
pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;

// Messaging
pub mod dispatcher;
pub mod hub;

// Re-export primary types at crate root for convenience
pub use config::{DispatcherConfig, HubConfig};
pub use dispatcher::{DeferredCall, Dispatcher, DispatcherStats, WorkerKey};
pub use error::{DispatchError, HubError, PubSubError, PubSubResult};
pub use hub::{DeliveryMode, Handler, Hub, HubStats, SubscribeOptions, SubscriptionInfo};
pub use scheduler::{Affinity, ExecutionContext, Priority, Scheduler, ThreadScheduler, WorkerBody, WorkerSpec};
