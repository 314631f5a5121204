//! Queue port - タスク状態を動かす操作の集合
//!
//! ストア実装（Redis Streams / InMemory）を差し替えられるよう、
//! 具体的なクライアント型ではなく trait として定義します。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EntryId, QueueError, Task, TaskId};

/// A task delivered to one consumer, together with the log entry that carried it.
///
/// The entry stays outstanding for the consumer group until it is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Claimed {
    pub entry_id: EntryId,
    pub task: Task,
}

/// Queue port (interface).
///
/// # 設計原則
/// - 配送の権威はログ側の pending-entry 管理（consumer group）にある
/// - durable record は `attempts` などの正本だが、配送そのものには関与しない
/// - 失敗時の retry / DLQ 判断は呼び出し側（Consumer）が行う
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append a task to the live log.
    ///
    /// Assigns an id if empty, sets `status=queued` and `created_at=now`. The
    /// durable-state write afterwards is best-effort and never fails the call.
    async fn enqueue(&self, task: Task) -> Result<EntryId, QueueError>;

    /// Record a task and index it in the time-ordered set under `run_at`.
    async fn enqueue_delayed(&self, task: Task, run_at: DateTime<Utc>)
    -> Result<TaskId, QueueError>;

    /// Wait up to `block` for the next undelivered entry for this consumer.
    ///
    /// `Ok(None)` on timeout. An undecodable entry yields `QueueError::Decode`
    /// and is left outstanding.
    async fn claim(&self, consumer: &str, block: Duration) -> Result<Option<Claimed>, QueueError>;

    /// Acknowledge an entry. Acknowledging twice is not an error.
    async fn ack(&self, entry_id: &EntryId) -> Result<(), QueueError>;

    /// Count a failed attempt: bumps `task.attempts`, records `cause` and persists.
    ///
    /// Does not touch the log entry.
    async fn fail(&self, entry_id: &EntryId, task: &mut Task, cause: &str)
    -> Result<(), QueueError>;

    /// Append to the dead-letter log, acknowledge the entry, persist `status=failed`.
    async fn to_dlq(&self, entry_id: &EntryId, task: &mut Task, reason: &str)
    -> Result<(), QueueError>;

    /// Upsert the durable record.
    async fn save_state(&self, task: &Task) -> Result<(), QueueError>;

    /// Read the durable record; `Ok(None)` when there is none.
    async fn get(&self, id: &TaskId) -> Result<Option<Task>, QueueError>;
}
