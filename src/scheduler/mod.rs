//! Scheduler port.
//!
//! The dispatcher and the hub never talk to the OS directly. They ask a
//! [`Scheduler`] for the calling context (priority and core affinity) and for
//! long-lived workers. [`ThreadScheduler`] is the host implementation on top
//! of `std::thread`; an RTOS port implements the same trait with native tasks.

use std::fmt;
use std::io;

/// OS thread backed scheduler.
pub mod thread;

pub use thread::ThreadScheduler;

/// Task priority. Only the low 16 bits take part in worker keys.
pub type Priority = u16;

/// Execution affinity of a task or a deferred call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Affinity {
    /// Pinned to one processing core.
    ///
    /// Core `0xffff` is reserved and treated as [`Affinity::Any`].
    Core(u16),
    /// No core preference.
    Any,
}

impl Affinity {
    /// Single-character tag used in worker names.
    #[must_use]
    pub const fn tag(self) -> char {
        match self {
            Self::Any => '*',
            Self::Core(core @ 0..=9) => (b'0' + core as u8) as char,
            Self::Core(_) => '?',
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(core) => write!(f, "core{core}"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// Priority and affinity of the calling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    #[allow(missing_docs)]
    pub priority: Priority,
    #[allow(missing_docs)]
    pub affinity: Affinity,
}

impl ExecutionContext {
    /// Creates a context.
    #[must_use]
    pub const fn new(priority: Priority, affinity: Affinity) -> Self {
        Self { priority, affinity }
    }
}

/// Parameters of a worker to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Human readable worker name.
    pub name: String,
    #[allow(missing_docs)]
    pub priority: Priority,
    #[allow(missing_docs)]
    pub affinity: Affinity,
    /// Stack size in bytes.
    pub stack_size: usize,
}

/// Body run by a worker for its whole lifetime.
pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Capabilities the core consumes from the underlying scheduler.
pub trait Scheduler: Send + Sync {
    /// Returns the priority and affinity of the caller.
    fn current_context(&self) -> ExecutionContext;

    /// Creates a detached worker running `body` with the given spec.
    ///
    /// Code running inside `body` must observe `spec.priority` and
    /// `spec.affinity` through [`Scheduler::current_context`].
    fn spawn_worker(&self, spec: WorkerSpec, body: WorkerBody) -> io::Result<()>;
}
