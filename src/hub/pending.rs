use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::scheduler::Priority;

use super::subscription::Subscription;

/// How a publish routes its subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PublishMode {
    /// Each subscriber's own delivery mode.
    Registered,
    /// Every subscriber through the dispatcher, optionally at one priority.
    AlwaysAsync { priority: Option<Priority> },
}

/// A hub call that could not take the table lock when it was made.
#[derive(Debug)]
pub(crate) enum PendingOp<M> {
    Publish {
        channel: String,
        message: M,
        mode: PublishMode,
    },
    Subscribe {
        channel: String,
        name: String,
        subscription: Subscription<M>,
    },
    Unsubscribe {
        channel: String,
        name: String,
    },
    ClearChannel {
        channel: String,
    },
    ClearAll,
}

impl<M> PendingOp<M> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "publish",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::ClearChannel { .. } => "clear_channel",
            Self::ClearAll => "clear",
        }
    }
}

/// FIFO of deferred hub calls.
///
/// The mutex is only held to push or to swap the contents out; it is never
/// held while a pending operation runs.
pub(crate) struct PendingQueue<M> {
    ops: Mutex<VecDeque<PendingOp<M>>>,
}

impl<M> PendingQueue<M> {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingOp<M>>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, op: PendingOp<M>) {
        self.lock().push_back(op);
    }

    /// Queues a deferred subscribe unless its name would already be taken
    /// once the queued operations ahead of it have run.
    ///
    /// `taken_now` is the table's answer for the (channel, name) pair.
    /// Returns the subscription back when the name is taken.
    pub fn push_subscribe(
        &self,
        channel: String,
        name: String,
        subscription: Subscription<M>,
        taken_now: bool,
    ) -> Result<(), Subscription<M>> {
        let mut ops = self.lock();
        if name_taken_after(&ops, &channel, &name, taken_now) {
            return Err(subscription);
        }
        ops.push_back(PendingOp::Subscribe {
            channel,
            name,
            subscription,
        });
        Ok(())
    }

    /// Puts back operations that were taken out but could not run yet,
    /// ahead of anything queued since.
    pub fn requeue(&self, ops: impl IntoIterator<Item = PendingOp<M>>) {
        let mut queued = self.lock();
        let later = std::mem::take(&mut *queued);
        queued.extend(ops);
        queued.extend(later);
    }

    /// Moves every queued operation into a private batch.
    pub fn take_all(&self) -> VecDeque<PendingOp<M>> {
        let mut ops = self.lock();
        if ops.is_empty() {
            return VecDeque::new();
        }
        std::mem::take(&mut *ops)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Replays queued registrations for one key on top of the table state.
fn name_taken_after<M>(ops: &VecDeque<PendingOp<M>>, channel: &str, name: &str, taken_now: bool) -> bool {
    ops.iter().fold(taken_now, |taken, op| match op {
        PendingOp::Subscribe { channel: c, name: n, .. } if c == channel && n == name => true,
        PendingOp::Unsubscribe { channel: c, name: n } if c == channel && n == name => false,
        PendingOp::ClearChannel { channel: c } if c == channel => false,
        PendingOp::ClearAll => false,
        _ => taken,
    })
}
