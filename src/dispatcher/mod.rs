//! Deferred-call dispatcher.
//!
//! Executes callables asynchronously on dedicated workers, one worker per
//! distinct (priority, affinity) key. Each worker drains a bounded FIFO, so
//! calls submitted to the same key run one at a time in submission order.
//! Calls submitted to different keys may run concurrently.
//!
//! Worker queues are created lazily on first use and live as long as the
//! dispatcher. A full queue blocks the submitter for at most
//! [`DispatcherConfig::enqueue_timeout`]; after that the condition is treated
//! as fatal, because it means a stuck worker or a mis-sized queue rather than
//! transient load.

use std::collections::HashMap;
use std::fmt;
use std::panic;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::sync::atomic::Ordering;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use tracing::{error, info};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::scheduler::{Affinity, ExecutionContext, Priority, Scheduler, ThreadScheduler, WorkerSpec};

/// Worker key packing.
pub mod key;
/// Worker loop and counters.
pub mod worker;

pub use key::WorkerKey;
pub use worker::DispatcherStats;

use worker::WorkerCounters;

/// An owned callable executed once by a worker.
pub type DeferredCall = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL: OnceLock<Arc<Dispatcher>> = OnceLock::new();

/// Registry of (priority, affinity) worker queues.
pub struct Dispatcher {
    cfg: DispatcherConfig,
    scheduler: Arc<dyn Scheduler>,
    queues: Mutex<HashMap<WorkerKey, Sender<DeferredCall>>>,
    counters: Arc<WorkerCounters>,
}

impl Dispatcher {
    /// Create a dispatcher on top of an explicit scheduler.
    pub fn new(cfg: DispatcherConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            cfg,
            scheduler,
            queues: Mutex::new(HashMap::new()),
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    /// Create a dispatcher backed by OS threads.
    pub fn with_config(cfg: DispatcherConfig) -> Self {
        let scheduler = Arc::new(ThreadScheduler::new(cfg.default_priority));
        Self::new(cfg, scheduler)
    }

    /// The process-wide dispatcher, built with default settings on first use.
    ///
    /// It is never dropped, so its workers run for the rest of the process.
    pub fn global() -> &'static Arc<Dispatcher> {
        GLOBAL.get_or_init(|| Arc::new(Self::with_config(DispatcherConfig::default())))
    }

    /// Defer `call` at the default priority, on the caller's current affinity.
    ///
    /// # Panics
    ///
    /// Panics if the worker queue stays full for the whole enqueue bound, or
    /// if the worker for a new key cannot be created.
    pub fn submit<F>(&self, call: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_to(call, self.cfg.default_priority, None);
    }

    /// Defer `call` to the worker for (`priority`, `affinity`).
    ///
    /// `affinity = None` resolves to the caller's affinity at call time.
    ///
    /// # Panics
    ///
    /// Panics on the same fatal conditions as [`Dispatcher::submit`]. The
    /// payload is the [`DispatchError`]; workers do not contain it as a
    /// handler fault, so a call that hits it takes its worker down.
    pub fn submit_to<F>(&self, call: F, priority: Priority, affinity: Option<Affinity>)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(err) = self.try_submit_to(call, priority, affinity) {
            error!(%err, "fatal deferred call failure");
            panic::panic_any(err);
        }
    }

    /// Fallible form of [`Dispatcher::submit_to`].
    ///
    /// Still blocks for up to the enqueue bound while the queue is full.
    pub fn try_submit_to<F>(
        &self,
        call: F,
        priority: Priority,
        affinity: Option<Affinity>,
    ) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let affinity = affinity.unwrap_or_else(|| self.scheduler.current_context().affinity);
        let key = WorkerKey::new(priority, affinity);
        let tx = self.queue_for(key)?;

        let call: DeferredCall = Box::new(call);
        match tx.send_timeout(call, self.cfg.enqueue_timeout) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(DispatchError::QueueTimeout {
                worker: self.worker_name(key),
                timeout_ms: self.cfg.enqueue_timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            Err(SendTimeoutError::Disconnected(_)) => Err(DispatchError::Disconnected {
                worker: self.worker_name(key),
            }),
        }
    }

    /// Number of worker queues created so far.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.lock_queues().len()
    }

    /// Calls waiting in the queue for (`priority`, `affinity`).
    ///
    /// Returns 0 for a key that has no worker yet.
    #[must_use]
    pub fn queued(&self, priority: Priority, affinity: Affinity) -> usize {
        self.lock_queues()
            .get(&WorkerKey::new(priority, affinity))
            .map_or(0, Sender::len)
    }

    /// Snapshot of the dispatcher counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.counters.snapshot()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    /// The scheduler used to resolve contexts and create workers.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Priority and affinity of the caller, as seen by the scheduler.
    #[must_use]
    pub fn current_context(&self) -> ExecutionContext {
        self.scheduler.current_context()
    }

    fn lock_queues(&self) -> MutexGuard<'_, HashMap<WorkerKey, Sender<DeferredCall>>> {
        // Map operations never panic half-way, so a poisoned map is still consistent.
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker_name(&self, key: WorkerKey) -> String {
        key.worker_name(&self.cfg.worker_name_prefix)
    }

    fn queue_for(&self, key: WorkerKey) -> Result<Sender<DeferredCall>, DispatchError> {
        let (tx, new_rx) = {
            let mut queues = self.lock_queues();
            if let Some(tx) = queues.get(&key) {
                (tx.clone(), None)
            } else {
                let (tx, rx) = bounded::<DeferredCall>(self.cfg.effective_queue_capacity());
                queues.insert(key, tx.clone());
                (tx, Some(rx))
            }
        };

        // Worker creation may be slow; it happens outside the registry lock.
        if let Some(rx) = new_rx {
            if let Err(err) = self.start_worker(key, rx) {
                self.lock_queues().remove(&key);
                error!(%err, "deferred call worker not created");
                return Err(err);
            }
        }

        Ok(tx)
    }

    fn start_worker(&self, key: WorkerKey, rx: Receiver<DeferredCall>) -> Result<(), DispatchError> {
        let name = self.worker_name(key);
        let spec = WorkerSpec {
            name: name.clone(),
            priority: key.priority(),
            affinity: key.affinity(),
            stack_size: self.cfg.worker_stack_size,
        };
        let counters = Arc::clone(&self.counters);
        let worker_name = name.clone();

        self.scheduler
            .spawn_worker(spec, Box::new(move || worker::run(&worker_name, &rx, &counters)))
            .map_err(|err| DispatchError::SpawnFailed {
                worker: name.clone(),
                reason: err.to_string(),
            })?;

        info!(worker = %name, capacity = self.cfg.effective_queue_capacity(), "created deferred call queue");
        Ok(())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cfg", &self.cfg)
            .field("workers", &self.worker_count())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
