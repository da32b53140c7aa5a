use std::cell::Cell;
use std::io;
use std::thread;

use core_affinity::CoreId;
use tracing::{debug, warn};

use super::{Affinity, ExecutionContext, Priority, Scheduler, WorkerBody, WorkerSpec};

thread_local! {
    static CURRENT: Cell<Option<ExecutionContext>> = const { Cell::new(None) };
}

/// Scheduler backed by named OS threads.
///
/// Workers are detached threads pinned with `core_affinity` when their
/// affinity names a core. Priorities are logical: they select the worker
/// queue and appear in worker names, but the OS thread priority is left
/// untouched.
///
/// Threads this scheduler did not create report the default priority and
/// [`Affinity::Any`] unless they run inside [`ThreadScheduler::enter`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadScheduler {
    default_priority: Priority,
}

impl ThreadScheduler {
    /// Creates a scheduler reporting `default_priority` for foreign threads.
    #[must_use]
    pub const fn new(default_priority: Priority) -> Self {
        Self { default_priority }
    }

    /// Runs `f` on the current thread as if it were a task with `ctx`.
    ///
    /// The previous context is restored afterwards, also on unwind.
    pub fn enter<R>(ctx: ExecutionContext, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<ExecutionContext>);

        impl Drop for Restore {
            fn drop(&mut self) {
                CURRENT.with(|current| current.set(self.0));
            }
        }

        let _restore = Restore(CURRENT.with(|current| current.replace(Some(ctx))));
        f()
    }

    /// Context recorded for the current thread, if any.
    #[must_use]
    pub fn recorded_context() -> Option<ExecutionContext> {
        CURRENT.with(Cell::get)
    }
}

impl Scheduler for ThreadScheduler {
    fn current_context(&self) -> ExecutionContext {
        Self::recorded_context()
            .unwrap_or_else(|| ExecutionContext::new(self.default_priority, Affinity::Any))
    }

    fn spawn_worker(&self, spec: WorkerSpec, body: WorkerBody) -> io::Result<()> {
        let ctx = ExecutionContext::new(spec.priority, spec.affinity);
        let name = spec.name.clone();
        thread::Builder::new()
            .name(spec.name)
            .stack_size(spec.stack_size)
            .spawn(move || {
                if let Affinity::Core(core) = ctx.affinity {
                    pin_to_core(&name, core);
                }
                CURRENT.with(|current| current.set(Some(ctx)));
                debug!(worker = %name, priority = ctx.priority, affinity = %ctx.affinity, "worker started");
                body();
            })?;
        Ok(())
    }
}

fn pin_to_core(worker: &str, core: u16) {
    let id = usize::from(core);
    let available = core_affinity::get_core_ids().is_some_and(|ids| ids.iter().any(|c| c.id == id));
    if !(available && core_affinity::set_for_current(CoreId { id })) {
        warn!(worker, core, "cannot pin worker to core, running unpinned");
    }
}
