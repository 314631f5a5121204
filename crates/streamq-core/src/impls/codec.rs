//! Log entry payload codec shared by the adapters.
//!
//! Live-log entries carry one field, `task`, holding the JSON task snapshot.
//! Dead-letter entries carry the same snapshot with a `reason` key added, plus a
//! top-level `reason` field so the cause is readable without parsing JSON.

use serde::{Deserialize, Serialize};

use crate::domain::{DeadLetter, EntryId, QueueError, Task};

pub const TASK_FIELD: &str = "task";
pub const REASON_FIELD: &str = "reason";

#[derive(Serialize)]
struct DeadLetterBody<'a> {
    #[serde(flatten)]
    task: &'a Task,
    reason: &'a str,
}

#[derive(Deserialize)]
struct DeadLetterRecord {
    #[serde(flatten)]
    task: Task,
    #[serde(default)]
    reason: String,
}

pub fn encode_task(task: &Task) -> Result<String, QueueError> {
    serde_json::to_string(task).map_err(|e| QueueError::Encode(e.to_string()))
}

pub fn decode_task(entry_id: &EntryId, raw: &str) -> Result<Task, QueueError> {
    serde_json::from_str(raw).map_err(|e| QueueError::Decode {
        entry_id: entry_id.clone(),
        reason: e.to_string(),
    })
}

pub fn encode_dead_letter(task: &Task, reason: &str) -> Result<String, QueueError> {
    serde_json::to_string(&DeadLetterBody { task, reason })
        .map_err(|e| QueueError::Encode(e.to_string()))
}

pub fn decode_dead_letter(entry_id: &EntryId, raw: &str) -> Result<DeadLetter, QueueError> {
    let record: DeadLetterRecord = serde_json::from_str(raw).map_err(|e| QueueError::Decode {
        entry_id: entry_id.clone(),
        reason: e.to_string(),
    })?;
    Ok(DeadLetter {
        entry_id: entry_id.clone(),
        task: record.task,
        reason: record.reason,
    })
}
