//! Typed publish/subscribe hub.
//!
//! A [`Hub<M>`] routes messages of type `M` published on named channels to
//! the handlers subscribed there. Sync subscribers run in-line on the
//! publisher's stack, in subscriber-name order; async subscribers are handed
//! to the [`Dispatcher`] worker for their (priority, affinity).
//!
//! The hub is reentrant. Every entry point only ever *tries* the channel
//! table lock. When the lock is busy (typically because the caller is a
//! handler running inside a publish) the call is captured as a pending
//! operation and returns at once. Whichever hub call next completes a table
//! access drains the pending operations in FIFO order.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::dispatcher::Dispatcher;
use crate::error::HubError;
use crate::scheduler::Priority;

mod global;
mod names;
mod pending;
mod subscription;
mod table;

pub use subscription::{DeliveryMode, Handler, SubscribeOptions, SubscriptionInfo};

use pending::{PendingOp, PendingQueue, PublishMode};
use subscription::Subscription;
use table::ChannelTable;

/// Point-in-time view of the hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Publishes that reached the channel table.
    pub publishes: u64,
    /// Handlers invoked in-line.
    pub sync_deliveries: u64,
    /// Handlers handed to the dispatcher.
    pub async_deliveries: u64,
    /// Calls that found the table busy and were queued.
    pub deferred_ops: u64,
}

#[derive(Debug, Default)]
struct HubCounters {
    publishes: AtomicU64,
    sync_deliveries: AtomicU64,
    async_deliveries: AtomicU64,
    deferred_ops: AtomicU64,
}

enum Attempt<M> {
    Done(Result<(), HubError>),
    Blocked(PendingOp<M>),
}

/// Reentrant publish/subscribe hub for messages of type `M`.
///
/// Use a tuple for several arguments. Channels are created by their first
/// subscription and removed with their last one.
pub struct Hub<M: Clone + Send + 'static> {
    cfg: HubConfig,
    dispatcher: Arc<Dispatcher>,
    table: RwLock<ChannelTable<M>>,
    pending: PendingQueue<M>,
    counters: HubCounters,
}

impl<M: Clone + Send + 'static> Hub<M> {
    /// Creates an empty hub delivering async subscribers through `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_config(dispatcher, HubConfig::default())
    }

    #[allow(missing_docs)]
    pub fn with_config(dispatcher: Arc<Dispatcher>, cfg: HubConfig) -> Self {
        Self {
            cfg,
            dispatcher,
            table: RwLock::new(ChannelTable::new()),
            pending: PendingQueue::new(),
            counters: HubCounters::default(),
        }
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    /// Delivers `message` to every subscriber of `channel` by its own mode.
    ///
    /// Sync subscribers have run when this returns, unless the table was busy
    /// and the publish was deferred. Publishing to a channel without
    /// subscribers does nothing.
    pub fn publish(&self, channel: &str, message: M) {
        self.publish_with(channel, message, PublishMode::Registered);
    }

    /// Delivers `message` to every subscriber of `channel` through the
    /// dispatcher, sync subscribers included.
    pub fn publish_async(&self, channel: &str, message: M) {
        self.publish_with(channel, message, PublishMode::AlwaysAsync { priority: None });
    }

    /// Like [`Hub::publish_async`], with `priority` instead of each
    /// subscriber's own. Affinities are kept.
    pub fn publish_async_with_priority(&self, channel: &str, message: M, priority: Priority) {
        self.publish_with(
            channel,
            message,
            PublishMode::AlwaysAsync {
                priority: Some(priority),
            },
        );
    }

    fn publish_with(&self, channel: &str, message: M, mode: PublishMode) {
        // Publishing has no failure mode of its own.
        let _ = self.run(PendingOp::Publish {
            channel: channel.to_string(),
            message,
            mode,
        });
    }

    // ------------------------------------------------------------------
    // Subscribe
    // ------------------------------------------------------------------

    /// Subscribes `handler` for in-line delivery and returns its generated name.
    pub fn subscribe_sync<F>(&self, channel: &str, handler: F) -> String
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let subscription = self.subscription(handler, &SubscribeOptions::sync());
        self.register_generated(channel, subscription)
    }

    /// Subscribes `handler` for dispatcher delivery at the caller's priority
    /// and affinity, and returns its generated name.
    pub fn subscribe_async<F>(&self, channel: &str, handler: F) -> String
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let subscription = self.subscription(handler, &SubscribeOptions::asynchronous());
        self.register_generated(channel, subscription)
    }

    /// Subscribes `handler` for dispatcher delivery at `priority`.
    pub fn subscribe_async_with_priority<F>(&self, channel: &str, handler: F, priority: Priority) -> String
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let subscription = self.subscription(handler, &SubscribeOptions::asynchronous().priority(priority));
        self.register_generated(channel, subscription)
    }

    /// Subscribes `handler` under `name` for in-line delivery.
    ///
    /// # Errors
    ///
    /// [`HubError::DuplicateSubscription`] when `name` is taken on `channel`,
    /// counting deferred subscriptions that have not run yet.
    pub fn subscribe_sync_named<F>(&self, channel: &str, name: impl Into<String>, handler: F) -> Result<(), HubError>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let subscription = self.subscription(handler, &SubscribeOptions::sync());
        self.register(channel, name.into(), subscription)
    }

    /// Subscribes `handler` under `name` for dispatcher delivery.
    ///
    /// # Errors
    ///
    /// Same as [`Hub::subscribe_sync_named`].
    pub fn subscribe_async_named<F>(&self, channel: &str, name: impl Into<String>, handler: F) -> Result<(), HubError>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let subscription = self.subscription(handler, &SubscribeOptions::asynchronous());
        self.register(channel, name.into(), subscription)
    }

    /// General form of the subscribe calls. Returns the subscriber name.
    ///
    /// # Errors
    ///
    /// [`HubError::DuplicateSubscription`] when an explicit name is taken.
    pub fn subscribe_with<F>(&self, channel: &str, handler: F, options: SubscribeOptions) -> Result<String, HubError>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let subscription = self.subscription(handler, &options);
        match options.name {
            Some(name) => {
                self.register(channel, name.clone(), subscription)?;
                Ok(name)
            }
            None => Ok(self.register_generated(channel, subscription)),
        }
    }

    fn subscription<F>(&self, handler: F, options: &SubscribeOptions) -> Subscription<M>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        let ctx = self.dispatcher.current_context();
        Subscription {
            handler: Arc::new(handler),
            priority: options.priority.unwrap_or(ctx.priority),
            affinity: options.affinity.unwrap_or(ctx.affinity),
            mode: options.mode,
        }
    }

    fn register(&self, channel: &str, name: String, subscription: Subscription<M>) -> Result<(), HubError> {
        self.run(PendingOp::Subscribe {
            channel: channel.to_string(),
            name,
            subscription,
        })
    }

    fn register_generated(&self, channel: &str, subscription: Subscription<M>) -> String {
        loop {
            let name = names::generate(self.cfg.effective_name_len());
            match self.register(channel, name.clone(), subscription.clone()) {
                Ok(()) => return name,
                Err(err) => warn!(%err, "generated subscriber name collided, retrying"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Unsubscribe / clear
    // ------------------------------------------------------------------

    /// Removes subscriber `name` from `channel`. Unknown names are ignored.
    pub fn unsubscribe(&self, channel: &str, name: &str) {
        let _ = self.run(PendingOp::Unsubscribe {
            channel: channel.to_string(),
            name: name.to_string(),
        });
    }

    /// Removes every subscriber of `channel`.
    pub fn clear_channel(&self, channel: &str) {
        let _ = self.run(PendingOp::ClearChannel {
            channel: channel.to_string(),
        });
    }

    /// Removes every subscriber of every channel.
    pub fn clear(&self) {
        let _ = self.run(PendingOp::ClearAll);
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------
    //
    // These wait for the table. Writers never wait, so a handler calling
    // them from inside a publish cannot deadlock.

    /// Number of subscribers currently registered on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read().len(channel)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn has_subscriber(&self, channel: &str, name: &str) -> bool {
        self.read().contains(channel, name)
    }

    /// Channels with at least one subscriber, in name order.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.read().channel_names()
    }

    /// Subscribers of `channel` in delivery order.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<SubscriptionInfo> {
        self.read()
            .subscribers(channel)
            .map(|set| set.iter().map(|(name, sub)| sub.info(name)).collect())
            .unwrap_or_default()
    }

    /// Operations waiting for the next drain.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            publishes: self.counters.publishes.load(Ordering::Relaxed),
            sync_deliveries: self.counters.sync_deliveries.load(Ordering::Relaxed),
            async_deliveries: self.counters.async_deliveries.load(Ordering::Relaxed),
            deferred_ops: self.counters.deferred_ops.load(Ordering::Relaxed),
        }
    }

    /// Dispatcher used for async delivery.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.cfg
    }

    // ------------------------------------------------------------------
    // Table access protocol
    // ------------------------------------------------------------------

    fn read(&self) -> RwLockReadGuard<'_, ChannelTable<M>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_shared(&self) -> Option<RwLockReadGuard<'_, ChannelTable<M>>> {
        match self.table.try_read() {
            Ok(guard) => Some(guard),
            // Every mutation is a single map operation; the table is consistent.
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn try_exclusive(&self) -> Option<RwLockWriteGuard<'_, ChannelTable<M>>> {
        match self.table.try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Entry point shared by every public call: run now and drain, or defer.
    ///
    /// A sync handler panic still drains what it deferred before unwinding on
    /// to the caller.
    fn run(&self, op: PendingOp<M>) -> Result<(), HubError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.attempt(op))) {
            Ok(Attempt::Done(result)) => {
                self.drain_pending();
                result
            }
            Ok(Attempt::Blocked(op)) => self.defer(op),
            Err(payload) => {
                self.drain_pending();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Executes `op` if the table lock is available. Never blocks.
    fn attempt(&self, op: PendingOp<M>) -> Attempt<M> {
        match op {
            PendingOp::Publish { channel, message, mode } => {
                let Some(table) = self.try_shared() else {
                    return Attempt::Blocked(PendingOp::Publish { channel, message, mode });
                };
                self.deliver(&table, &channel, &message, mode);
                Attempt::Done(Ok(()))
            }
            PendingOp::Subscribe {
                channel,
                name,
                subscription,
            } => {
                let Some(mut table) = self.try_exclusive() else {
                    return Attempt::Blocked(PendingOp::Subscribe {
                        channel,
                        name,
                        subscription,
                    });
                };
                let result = table.insert(&channel, &name, subscription);
                drop(table);
                match &result {
                    Ok(()) => debug!(channel = %channel, subscriber = %name, "subscribed"),
                    Err(err) => error!(%err, "subscription rejected"),
                }
                Attempt::Done(result)
            }
            PendingOp::Unsubscribe { channel, name } => {
                let Some(mut table) = self.try_exclusive() else {
                    return Attempt::Blocked(PendingOp::Unsubscribe { channel, name });
                };
                let removed = table.remove(&channel, &name);
                drop(table);
                if removed.is_some() {
                    debug!(channel = %channel, subscriber = %name, "unsubscribed");
                }
                Attempt::Done(Ok(()))
            }
            PendingOp::ClearChannel { channel } => {
                let Some(mut table) = self.try_exclusive() else {
                    return Attempt::Blocked(PendingOp::ClearChannel { channel });
                };
                let removed = table.remove_channel(&channel);
                drop(table);
                debug!(channel = %channel, removed = removed.map_or(0, |set| set.len()), "channel cleared");
                Attempt::Done(Ok(()))
            }
            PendingOp::ClearAll => {
                let Some(mut table) = self.try_exclusive() else {
                    return Attempt::Blocked(PendingOp::ClearAll);
                };
                let removed = table.take_all();
                drop(table);
                debug!(channels = removed.len(), "hub cleared");
                Attempt::Done(Ok(()))
            }
        }
    }

    fn defer(&self, op: PendingOp<M>) -> Result<(), HubError> {
        self.counters.deferred_ops.fetch_add(1, Ordering::Relaxed);
        debug!(op = op.kind(), "channel table busy, operation deferred");

        match op {
            PendingOp::Subscribe {
                channel,
                name,
                subscription,
            } => {
                let taken_now = self.try_shared().is_some_and(|table| table.contains(&channel, &name));
                let key = (channel.clone(), name.clone());
                self.pending
                    .push_subscribe(channel, name, subscription, taken_now)
                    .map_err(|_| {
                        let (channel, name) = key;
                        let err = HubError::DuplicateSubscription { channel, name };
                        error!(%err, "subscription rejected");
                        err
                    })?;
            }
            op => self.pending.push(op),
        }
        self.drain_if_idle();
        Ok(())
    }

    /// Drains now if nobody holds the table.
    ///
    /// Covers an operation queued after the holder on another thread already
    /// finished its drain. A holder on this thread keeps it a no-op.
    fn drain_if_idle(&self) {
        let idle = self.try_exclusive().is_some();
        if idle {
            self.drain_pending();
        }
    }

    /// Executes queued operations in FIFO order on the calling thread.
    ///
    /// The queue is swapped out first, so operations queued while the batch
    /// runs are left to the nested call's own drain. An operation that still
    /// finds the table busy goes back, together with the rest of the batch,
    /// ahead of anything queued since.
    ///
    /// If a replayed publish panics, the rest of the batch is put back before
    /// the panic continues.
    fn drain_pending(&self) {
        let mut batch = self.pending.take_all();
        while let Some(op) = batch.pop_front() {
            match panic::catch_unwind(AssertUnwindSafe(|| self.attempt(op))) {
                // Failures were logged by `attempt`; the original caller is gone.
                Ok(Attempt::Done(_)) => self.drain_pending(),
                Ok(Attempt::Blocked(op)) => {
                    self.pending.requeue(std::iter::once(op).chain(batch));
                    self.drain_if_idle();
                    return;
                }
                Err(payload) => {
                    self.pending.requeue(batch);
                    panic::resume_unwind(payload);
                }
            }
        }
    }

    fn deliver(&self, table: &ChannelTable<M>, channel: &str, message: &M, mode: PublishMode) {
        self.counters.publishes.fetch_add(1, Ordering::Relaxed);
        info!(channel, "publish");

        let Some(subscribers) = table.subscribers(channel) else {
            return;
        };

        let forced = match mode {
            PublishMode::Registered => None,
            PublishMode::AlwaysAsync { priority } => Some(priority),
        };

        for (name, sub) in subscribers {
            if forced.is_some() || sub.mode == DeliveryMode::Async {
                let priority = forced.flatten().unwrap_or(sub.priority);
                info!(channel, subscriber = %name, priority, affinity = %sub.affinity, "~>");
                let handler = Arc::clone(&sub.handler);
                let message = message.clone();
                self.dispatcher.submit_to(move || handler(message), priority, Some(sub.affinity));
                self.counters.async_deliveries.fetch_add(1, Ordering::Relaxed);
            } else {
                info!(channel, subscriber = %name, "->");
                (sub.handler)(message.clone());
                self.counters.sync_deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<M: Clone + Send + 'static> fmt::Debug for Hub<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("cfg", &self.cfg)
            .field("pending", &self.pending_len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
