//! Durable task record layout.
//!
//! One field map per task, keyed by its id:
//! `status`, `attempts`, `max_attempts`, `type`, `next_run_at` (epoch ms, `0` when
//! unset), `created_at` (epoch ms), `last_error`, plus one `payload:<key>` field per
//! payload entry so a single payload value can be read on its own.
//!
//! Both adapters go through these helpers, so the in-memory store and Redis agree
//! on the layout byte for byte.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use super::{Task, TaskId};

pub const FIELD_STATUS: &str = "status";
pub const FIELD_ATTEMPTS: &str = "attempts";
pub const FIELD_MAX_ATTEMPTS: &str = "max_attempts";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_NEXT_RUN_AT: &str = "next_run_at";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_LAST_ERROR: &str = "last_error";
pub const PAYLOAD_PREFIX: &str = "payload:";

/// Flatten a task into record fields.
pub fn to_fields(task: &Task) -> Vec<(String, String)> {
    let mut fields = vec![
        (FIELD_STATUS.to_string(), task.status.as_str().to_string()),
        (FIELD_ATTEMPTS.to_string(), task.attempts.to_string()),
        (FIELD_MAX_ATTEMPTS.to_string(), task.max_attempts.to_string()),
        (FIELD_TYPE.to_string(), task.task_type.clone()),
        (FIELD_NEXT_RUN_AT.to_string(), epoch_ms(task.next_run_at).to_string()),
        (FIELD_CREATED_AT.to_string(), epoch_ms(task.created_at).to_string()),
        (
            FIELD_LAST_ERROR.to_string(),
            task.last_error.clone().unwrap_or_default(),
        ),
    ];
    fields.extend(
        task.payload
            .iter()
            .map(|(k, v)| (format!("{PAYLOAD_PREFIX}{k}"), v.clone())),
    );
    fields
}

/// Rebuild a task from record fields.
///
/// Returns `None` for an empty map: a missing record is "not found", not an error.
/// Unparseable numeric fields fall back to zero rather than failing the read.
pub fn from_fields(id: &TaskId, fields: &HashMap<String, String>) -> Option<Task> {
    if fields.is_empty() {
        return None;
    }

    let number = |name: &str| -> u32 {
        fields
            .get(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    };
    let timestamp = |name: &str| -> Option<DateTime<Utc>> {
        fields
            .get(name)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(from_epoch_ms)
    };

    let payload = fields
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(PAYLOAD_PREFIX)
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect();

    Some(Task {
        id: id.clone(),
        task_type: fields.get(FIELD_TYPE).cloned().unwrap_or_default(),
        payload,
        attempts: number(FIELD_ATTEMPTS),
        max_attempts: number(FIELD_MAX_ATTEMPTS),
        status: fields
            .get(FIELD_STATUS)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        created_at: timestamp(FIELD_CREATED_AT),
        next_run_at: timestamp(FIELD_NEXT_RUN_AT),
        last_error: fields
            .get(FIELD_LAST_ERROR)
            .filter(|s| !s.is_empty())
            .cloned(),
    })
}

/// Milliseconds since the epoch, `0` for an unset time.
pub fn epoch_ms(at: Option<DateTime<Utc>>) -> i64 {
    at.map(|t| t.timestamp_millis()).unwrap_or(0)
}

/// Inverse of [`epoch_ms`]; `0` (and anything unrepresentable) reads back as unset.
pub fn from_epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}
