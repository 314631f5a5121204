//! Producer entry point: turns a submission into an immediate or delayed task.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{DEFAULT_MAX_ATTEMPTS, QueueError, Task, TaskId};
use crate::ports::{Clock, IdGenerator, Queue, SystemClock, UlidGenerator};

/// What a producer submits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    /// `None` (or `0`) uses the default budget.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// A time in the future makes the task delayed; past or absent means "now".
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }
}

pub struct Enqueuer {
    queue: Arc<dyn Queue>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Enqueuer {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self::with_clock(queue, Arc::new(SystemClock))
    }

    pub fn with_clock(queue: Arc<dyn Queue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// Submit a task and return its id. Store failures are returned to the caller.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, QueueError> {
        let id = self.ids.generate_task_id();
        let task = Task::new(request.task_type)
            .with_id(id.clone())
            .with_payload(request.payload)
            .with_max_attempts(
                request
                    .max_attempts
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            );

        match request.run_at {
            Some(run_at) if run_at > self.clock.now() => {
                self.queue.enqueue_delayed(task, run_at).await?;
                info!(task_id = %id, %run_at, "task submitted (delayed)");
            }
            _ => {
                let entry_id = self.queue.enqueue(task).await?;
                info!(task_id = %id, %entry_id, "task submitted");
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::TaskStatus;
    use crate::impls::InMemoryStore;
    use crate::ports::{Bootstrap, FixedClock};
    use chrono::TimeZone;
    use rstest::rstest;

    async fn setup() -> (Arc<InMemoryStore>, Enqueuer, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::with_clock(QueueConfig::default(), clock.clone()));
        store.ensure_group().await.unwrap();
        let enqueuer = Enqueuer::with_clock(store.clone(), clock.clone());
        (store, enqueuer, clock)
    }

    #[rstest]
    #[case::unset(None, DEFAULT_MAX_ATTEMPTS)]
    #[case::zero(Some(0), DEFAULT_MAX_ATTEMPTS)]
    #[case::explicit(Some(3), 3)]
    #[tokio::test]
    async fn max_attempts_override(#[case] requested: Option<u32>, #[case] expected: u32) {
        let (store, enqueuer, _clock) = setup().await;
        let id = enqueuer
            .submit(TaskRequest {
                max_attempts: requested,
                ..TaskRequest::new("t")
            })
            .await
            .unwrap();

        let saved = store.get(&id).await.unwrap().unwrap();
        assert_eq!(saved.max_attempts, expected);
    }

    #[tokio::test]
    async fn immediate_request_lands_in_live_log() {
        let (store, enqueuer, _clock) = setup().await;
        let id = enqueuer
            .submit(TaskRequest {
                payload: BTreeMap::from([("k".to_string(), "v".to_string())]),
                ..TaskRequest::new("email")
            })
            .await
            .unwrap();

        let live = store.live_tasks().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, id);
        assert_eq!(live[0].payload["k"], "v");
    }

    #[tokio::test]
    async fn future_run_at_is_delayed() {
        let (store, enqueuer, clock) = setup().await;
        let run_at = clock.now() + chrono::Duration::seconds(30);
        let id = enqueuer
            .submit(TaskRequest {
                run_at: Some(run_at),
                ..TaskRequest::new("later")
            })
            .await
            .unwrap();

        assert!(store.live_tasks().await.is_empty());
        assert_eq!(store.scheduled_at(&id).await, Some(run_at));
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, TaskStatus::Delayed);
    }

    #[tokio::test]
    async fn past_run_at_is_immediate() {
        let (store, enqueuer, clock) = setup().await;
        enqueuer
            .submit(TaskRequest {
                run_at: Some(clock.now() - chrono::Duration::seconds(1)),
                ..TaskRequest::new("t")
            })
            .await
            .unwrap();
        assert_eq!(store.live_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_returned() {
        let (store, enqueuer, _clock) = setup().await;
        store.set_unavailable(true);
        let err = enqueuer.submit(TaskRequest::new("t")).await.unwrap_err();
        assert!(matches!(err, QueueError::StoreUnavailable(_)));
    }
}
