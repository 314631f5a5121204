//! Errors - エラー型と分類
//!
//! - `QueueError`: ストア操作（port 呼び出し）の失敗
//! - `HandlerError`: handler が報告する業務エラー（retry / DLQ の判断対象）
//! - `StreamqError`: 長時間ループ（Scheduler / Consumer）の終了理由

use thiserror::Error;

use super::EntryId;

/// ErrorKind は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 一時的（次の iteration / tick で再試行）
    Transient,
    /// 恒久的（再試行しても同じ結果）
    Permanent,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("failed to encode task: {0}")]
    Encode(String),

    #[error("failed to decode entry {entry_id}: {reason}")]
    Decode { entry_id: EntryId, reason: String },

    /// Reported by adapters when the group already exists; `ensure_group` turns
    /// it into success.
    #[error("consumer group {group} already exists on {stream}")]
    SetupConflict { stream: String, group: String },

    #[error("consumer group {group} does not exist on {stream}")]
    NoGroup { stream: String, group: String },
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::StoreUnavailable(_) | QueueError::NoGroup { .. } => ErrorKind::Transient,
            QueueError::Encode(_) | QueueError::Decode { .. } | QueueError::SetupConflict { .. } => {
                ErrorKind::Permanent
            }
        }
    }
}

/// Failure reported by a task handler. Always recoverable at the queue level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Why a background loop returned.
#[derive(Debug, Error)]
pub enum StreamqError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("cancelled")]
    Cancelled,
}
