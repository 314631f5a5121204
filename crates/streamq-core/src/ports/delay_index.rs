//! DelayIndex port - 遅延タスクの時間順インデックス
//!
//! Scheduler だけが使う操作です。Queue port とは別にしておくことで、
//! Consumer 側からは見えないようにしています。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{EntryId, QueueError, Task, TaskId};

#[async_trait]
pub trait DelayIndex: Send + Sync {
    /// Up to `limit` ids whose due time is `<= now`, earliest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskId>, QueueError>;

    /// Move a due task into the live log as one atomic store operation.
    ///
    /// Only when the task's id is still in the set with a due time `<= now`:
    /// append the snapshot, remove the id, and mark the record `queued` with no
    /// `next_run_at`. Otherwise nothing changes and `None` comes back, e.g. when
    /// another scheduler promoted it first or a retry pushed it into the future.
    async fn promote(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> Result<Option<EntryId>, QueueError>;

    /// Remove an id from the time-ordered set. Removing an absent id is fine.
    async fn unschedule(&self, id: &TaskId) -> Result<(), QueueError>;
}
