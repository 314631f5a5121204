//! Domain identifiers.
//!
//! `TaskId` は durable record・遅延セット・ログエントリを結ぶ join key です。
//! `EntryId` はストリーム側が採番するエントリ ID（例: `1700000000000-0`）で、
//! claim / ack の単位になります。両者を別の型にしておくことで取り違えを防ぎます。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task. Immutable once assigned.
///
/// Producers may supply their own value; an empty id means "not assigned yet"
/// and is filled in by the queue on first enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Has an id been assigned yet?
    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of one entry in the live log (or the dead-letter log).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
