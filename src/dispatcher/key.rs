use std::fmt;

use crate::scheduler::{Affinity, Priority};

const ANY_CORE: u16 = 0xffff;

/// Packed (priority, affinity) pair selecting one worker queue.
///
/// Layout: priority in the high 16 bits, core in the low 16 bits, with
/// `0xffff` standing for [`Affinity::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerKey(u32);

impl WorkerKey {
    /// Packs a priority and an affinity.
    #[must_use]
    pub const fn new(priority: Priority, affinity: Affinity) -> Self {
        let core = match affinity {
            Affinity::Core(core) => core,
            Affinity::Any => ANY_CORE,
        };
        Self(((priority as u32) << 16) | core as u32)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn priority(self) -> Priority {
        (self.0 >> 16) as Priority
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn affinity(self) -> Affinity {
        match (self.0 & 0xffff) as u16 {
            ANY_CORE => Affinity::Any,
            core => Affinity::Core(core),
        }
    }

    /// The packed representation.
    #[must_use]
    pub const fn packed(self) -> u32 {
        self.0
    }

    /// Name of the worker serving this key, e.g. `defcalls-p5c*`.
    #[must_use]
    pub fn worker_name(self, prefix: &str) -> String {
        format!("{prefix}-p{}c{}", self.priority(), self.affinity().tag())
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}/{}", self.priority(), self.affinity())
    }
}
