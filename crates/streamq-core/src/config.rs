//! Runtime configuration for the queue, consumers and the scheduler.
//!
//! Values are plain structs with defaults; the binary fills them from flags and
//! environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::Backoff;

/// Store key names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Live log.
    pub stream_key: String,
    /// Consumer group on the live log.
    pub group: String,
    /// Time-ordered set of delayed task ids.
    pub scheduled_key: String,
    /// Dead-letter log.
    pub dlq_key: String,
    /// Durable records live at `<prefix><task id>`.
    pub task_key_prefix: String,
    /// A pending entry idle at least this long may be claimed by another
    /// consumer. `Duration::ZERO` turns reclaiming off.
    pub reclaim_idle: Duration,
}

impl QueueConfig {
    pub fn task_key(&self, id: &str) -> String {
        format!("{}{}", self.task_key_prefix, id)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stream_key: "streamq:tasks".to_string(),
            group: "streamq-workers".to_string(),
            scheduled_key: "streamq:tasks:scheduled".to_string(),
            dlq_key: "streamq:tasks:dlq".to_string(),
            task_key_prefix: "streamq:task:".to_string(),
            reclaim_idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Worker identity inside the consumer group.
    pub consumer_name: String,
    /// How long one claim may block waiting for work.
    pub block: Duration,
    pub backoff: Backoff,
    /// Pause after a failed claim before trying again.
    pub claim_error_pause: Duration,
}

impl ConsumerConfig {
    pub fn new(consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff = Backoff::new(base, cap);
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_name: "worker-1".to_string(),
            block: Duration::from_secs(5),
            backoff: Backoff::default(),
            claim_error_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Maximum number of due ids promoted per tick.
    pub batch: usize,
    /// Promote once right at start instead of waiting a full interval.
    pub immediate_first_tick: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch: 128,
            immediate_first_tick: true,
        }
    }
}
