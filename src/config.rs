//! Runtime configuration for the dispatcher and the hub.
//!
//! Both configs deserialize from partial documents: missing fields take
//! their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::Priority;

/// Deferred-call dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Slots in each (priority, affinity) worker queue.
    pub queue_capacity: usize,
    /// How long `submit` waits for a free slot before the failure is fatal.
    #[serde(rename = "enqueue_timeout_ms", with = "duration_ms")]
    pub enqueue_timeout: Duration,
    /// Priority used by `submit` and by threads the scheduler did not spawn.
    pub default_priority: Priority,
    /// Stack size of each worker, in bytes.
    pub worker_stack_size: usize,
    /// Worker names are `{prefix}-p{priority}c{core}`.
    pub worker_name_prefix: String,
}

impl DispatcherConfig {
    /// Default queue capacity per worker key.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 20;
    /// Default enqueue bound.
    pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(5000);
    /// Default priority, the one main-task code runs at.
    pub const DEFAULT_PRIORITY: Priority = 1;

    /// Capacity actually used when creating queues.
    #[must_use]
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: Self::DEFAULT_ENQUEUE_TIMEOUT,
            default_priority: Self::DEFAULT_PRIORITY,
            worker_stack_size: 256 * 1024,
            worker_name_prefix: "defcalls".to_string(),
        }
    }
}

/// Publish/subscribe hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Length of generated subscriber names.
    pub generated_name_len: usize,
}

impl HubConfig {
    /// Generated names are hex digits of a v4 UUID, so at most 32 characters.
    pub const MAX_GENERATED_NAME_LEN: usize = 32;

    /// Name length actually used, clamped to `[8, 32]`.
    #[must_use]
    pub fn effective_name_len(&self) -> usize {
        self.generated_name_len.clamp(8, Self::MAX_GENERATED_NAME_LEN)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            generated_name_len: 16,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatcher_defaults() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.queue_capacity, 20);
        assert_eq!(cfg.enqueue_timeout, Duration::from_secs(5));
        assert_eq!(cfg.default_priority, 1);
        assert_eq!(cfg.worker_name_prefix, "defcalls");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cfg = DispatcherConfig {
            queue_capacity: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(cfg.effective_queue_capacity(), 1);
    }

    #[test]
    fn partial_dispatcher_document_keeps_defaults() {
        let cfg: DispatcherConfig =
            serde_json::from_str(r#"{"queue_capacity": 4, "enqueue_timeout_ms": 250}"#).unwrap();
        assert_eq!(cfg.queue_capacity, 4);
        assert_eq!(cfg.enqueue_timeout, Duration::from_millis(250));
        assert_eq!(cfg.default_priority, DispatcherConfig::DEFAULT_PRIORITY);
        assert_eq!(cfg.worker_name_prefix, "defcalls");
    }

    #[test]
    fn dispatcher_config_serializes_timeout_in_ms() {
        let json = serde_json::to_value(DispatcherConfig::default()).unwrap();
        assert_eq!(json["enqueue_timeout_ms"], 5000);
        assert!(json.get("enqueue_timeout").is_none());
    }

    #[test]
    fn hub_name_len_is_clamped() {
        assert_eq!(HubConfig::default().effective_name_len(), 16);
        assert_eq!(HubConfig { generated_name_len: 2 }.effective_name_len(), 8);
        assert_eq!(HubConfig { generated_name_len: 99 }.effective_name_len(), 32);

        let cfg: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, HubConfig::default());
    }
}
