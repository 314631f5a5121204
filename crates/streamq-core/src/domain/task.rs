use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntryId, TaskId};

/// Used when a producer leaves `max_attempts` unset.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Informational task status.
///
/// Whether an entry is claimable is decided by the log's pending-entry
/// bookkeeping, not by this value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Done,
    Failed,
    Delayed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Delayed => "delayed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "delayed" => Ok(TaskStatus::Delayed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// The unit of work moved through the queue.
///
/// Log entries carry a JSON snapshot of this struct; the durable record
/// (see [`crate::domain::record`]) is the source of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Meaningful only while `status == Delayed`.
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn with_payload<K, V>(mut self, payload: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.payload = payload
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Would one more failure exhaust the retry budget?
    pub fn is_last_attempt(&self) -> bool {
        self.attempts.saturating_add(1) >= self.max_attempts
    }
}

/// A task read back from the dead-letter log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub entry_id: EntryId,
    #[serde(flatten)]
    pub task: Task,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Queued, "queued")]
    #[case(TaskStatus::Running, "running")]
    #[case(TaskStatus::Done, "done")]
    #[case(TaskStatus::Failed, "failed")]
    #[case(TaskStatus::Delayed, "delayed")]
    fn status_string_forms_agree(#[case] status: TaskStatus, #[case] text: &str) {
        assert_eq!(status.as_str(), text);
        assert_eq!(text.parse::<TaskStatus>().unwrap(), status);
        assert_eq!(serde_json::to_value(status).unwrap(), serde_json::json!(text));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[rstest]
    #[case(0, 3, false)]
    #[case(1, 3, false)]
    #[case(2, 3, true)]
    #[case(0, 1, true)]
    #[case(0, 0, true)]
    fn last_attempt_boundary(#[case] attempts: u32, #[case] max: u32, #[case] expected: bool) {
        let mut task = Task::new("t").with_max_attempts(max);
        task.attempts = attempts;
        assert_eq!(task.is_last_attempt(), expected);
    }

    #[test]
    fn snapshot_uses_wire_field_names() {
        let task = Task::new("demo.fail")
            .with_id("abc")
            .with_payload([("k", "v")])
            .with_max_attempts(3);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "demo.fail");
        assert_eq!(value["id"], "abc");
        assert_eq!(value["max_attempts"], 3);
        assert_eq!(value["status"], "queued");
        assert_eq!(value["payload"]["k"], "v");
    }

    #[test]
    fn sparse_snapshot_still_decodes() {
        let task: Task = serde_json::from_str(r#"{"id":"x","type":"t","status":"queued"}"#).unwrap();
        assert_eq!(task.id.as_str(), "x");
        assert_eq!(task.attempts, 0);
        assert!(task.payload.is_empty());
    }
}
