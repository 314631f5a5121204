//! Consumer loop: claim → handle → ack, or re-delay / dead-letter on failure.
//!
//! # フロー（1 iteration）
//! 1. shutdown を確認
//! 2. `claim`（最大 `block` 待つ）。`reclaim_idle` 以上放置された pending entry が
//!    あればそれを先に引き取る。空 / エラーは次の iteration へ
//! 3. `status=running` を保存（best-effort）
//! 4. handler 実行
//! 5. 成功: ack → `status=done` を保存
//! 6. 失敗: 予算切れなら `to_dlq`。そうでなければ
//!    `fail`（attempts+1 を保存）→ `ack` → `enqueue_delayed`
//!
//! 6 の順序は固定。入れ替えると retry の消失か二重実行のどちらかが起こりうる。
//! enqueue_delayed の前にクラッシュした場合は retry が失われる（at-least-once の境界）。
//!
//! 1 つの Consumer は逐次実行。並列度は consumer identity を増やして得る。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::handler::TaskHandler;
use super::shutdown::Shutdown;
use crate::config::ConsumerConfig;
use crate::domain::{
    EntryId, ErrorKind, HandlerError, QueueError, StreamqError, Task, TaskStatus,
};
use crate::ports::{Claimed, Clock, Queue, SystemClock};

/// What happened to one claimed task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    RetryScheduled { attempts: u32, run_at: DateTime<Utc> },
    DeadLettered { reason: String },
}

pub struct Consumer {
    queue: Arc<dyn Queue>,
    handler: Arc<dyn TaskHandler>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(queue: Arc<dyn Queue>, handler: Arc<dyn TaskHandler>, config: ConsumerConfig) -> Self {
        Self {
            queue,
            handler,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.consumer_name
    }

    /// Run until shutdown. Always returns `Err(StreamqError::Cancelled)`.
    ///
    /// A claimed task is processed to completion even if shutdown arrives while
    /// its handler runs.
    pub async fn run(&self, shutdown: Shutdown) -> Result<(), StreamqError> {
        info!(consumer = %self.name(), "consumer started");
        loop {
            if shutdown.is_cancelled() {
                info!(consumer = %self.name(), "consumer stopping");
                return Err(StreamqError::Cancelled);
            }

            match self.queue.claim(self.name(), self.config.block).await {
                Ok(Some(claimed)) => {
                    self.process(claimed).await;
                }
                Ok(None) => {
                    // claim がすでに待っているので、ここでは譲るだけ
                    tokio::task::yield_now().await;
                }
                Err(e) if e.kind() == ErrorKind::Permanent => {
                    // Stays pending; offered again once idle for `reclaim_idle`.
                    warn!(consumer = %self.name(), error = %e, "skipping undecodable entry");
                }
                Err(e) => {
                    warn!(consumer = %self.name(), error = %e, "claim failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.config.claim_error_pause) => {}
                    }
                }
            }
        }
    }

    /// Claim and process at most one task.
    pub async fn process_next(&self) -> Result<Option<Outcome>, QueueError> {
        match self.queue.claim(self.name(), self.config.block).await? {
            Some(claimed) => Ok(Some(self.process(claimed).await)),
            None => Ok(None),
        }
    }

    /// Drive one claimed task to a terminal outcome. Store errors past the claim
    /// are logged, never propagated.
    pub async fn process(&self, claimed: Claimed) -> Outcome {
        let Claimed { entry_id, mut task } = claimed;
        debug!(consumer = %self.name(), task_id = %task.id, %entry_id, attempts = task.attempts, "task claimed");

        task.status = TaskStatus::Running;
        self.save_best_effort(&task).await;

        match self.handler.handle(&task).await {
            Ok(()) => self.complete(&entry_id, task).await,
            Err(err) => self.handle_failure(&entry_id, task, err).await,
        }
    }

    async fn complete(&self, entry_id: &EntryId, mut task: Task) -> Outcome {
        if let Err(e) = self.queue.ack(entry_id).await {
            error!(consumer = %self.name(), task_id = %task.id, %entry_id, error = %e, "ack failed");
        }
        task.status = TaskStatus::Done;
        self.save_best_effort(&task).await;

        info!(consumer = %self.name(), task_id = %task.id, attempts = task.attempts, "task done");
        Outcome::Done
    }

    async fn handle_failure(&self, entry_id: &EntryId, mut task: Task, err: HandlerError) -> Outcome {
        let cause = err.message().to_string();

        if task.is_last_attempt() {
            match self.queue.to_dlq(entry_id, &mut task, &cause).await {
                Ok(()) => warn!(
                    consumer = %self.name(),
                    task_id = %task.id,
                    attempts = task.attempts,
                    reason = %cause,
                    "task dead-lettered"
                ),
                Err(e) => error!(
                    consumer = %self.name(),
                    task_id = %task.id,
                    %entry_id,
                    error = %e,
                    "dead-lettering incomplete; entry may be claimed again"
                ),
            }
            return Outcome::DeadLettered { reason: cause };
        }

        let delay = self.config.backoff.delay(task.attempts + 1);
        let run_at = retry_at(self.clock.now(), delay, self.config.backoff.cap);
        task.next_run_at = Some(run_at);

        if let Err(e) = self.queue.fail(entry_id, &mut task, &cause).await {
            warn!(task_id = %task.id, error = %e, "failed to record attempt");
        }
        if let Err(e) = self.queue.ack(entry_id).await {
            error!(task_id = %task.id, %entry_id, error = %e, "ack before retry failed");
        }
        if let Err(e) = self.queue.enqueue_delayed(task.clone(), run_at).await {
            error!(task_id = %task.id, error = %e, "retry could not be scheduled; task lost");
        }

        info!(
            consumer = %self.name(),
            task_id = %task.id,
            attempts = task.attempts,
            %run_at,
            error = %cause,
            "task failed, retry scheduled"
        );
        Outcome::RetryScheduled {
            attempts: task.attempts,
            run_at,
        }
    }

    async fn save_best_effort(&self, task: &Task) {
        if let Err(e) = self.queue.save_state(task).await {
            warn!(task_id = %task.id, status = %task.status, error = %e, "failed to save task state");
        }
    }
}

/// `now + delay`, falling back to `now + cap`, then to the latest representable
/// time, when the sum does not fit a timestamp.
fn retry_at(now: DateTime<Utc>, delay: StdDuration, cap: StdDuration) -> DateTime<Utc> {
    let after = |d: StdDuration| {
        chrono::Duration::from_std(d)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
    };
    after(delay)
        .or_else(|| after(cap))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::handler::handler_fn;
    use crate::config::QueueConfig;
    use crate::impls::InMemoryStore;
    use crate::domain::TaskId;
    use crate::ports::{Bootstrap, DeadLetterLog, DelayIndex, FixedClock};
    use chrono::TimeZone;
    use std::time::Duration;

    fn failing() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_task| async {
            Err::<(), _>(HandlerError::new("boom"))
        }))
    }

    fn succeeding() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_task| async { Ok::<(), HandlerError>(()) }))
    }

    async fn setup(handler: Arc<dyn TaskHandler>) -> (Arc<InMemoryStore>, Consumer, Arc<FixedClock>) {
        setup_with_block(handler, Duration::ZERO).await
    }

    async fn setup_with_block(
        handler: Arc<dyn TaskHandler>,
        block: Duration,
    ) -> (Arc<InMemoryStore>, Consumer, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryStore::with_clock(QueueConfig::default(), clock.clone()));
        store.ensure_group().await.unwrap();

        let config = ConsumerConfig::new("w1")
            .with_block(block)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1));
        let consumer = Consumer::new(store.clone(), handler, config).with_clock(clock.clone());
        (store, consumer, clock)
    }

    #[tokio::test]
    async fn success_acks_and_marks_done() {
        let (store, consumer, _clock) = setup(succeeding()).await;
        let entry = store.enqueue(Task::new("t").with_id("a")).await.unwrap();
        assert!(!entry.as_str().is_empty());

        let outcome = consumer.process_next().await.unwrap();
        assert_eq!(outcome, Some(Outcome::Done));
        assert_eq!(store.pending_count().await, 0);

        let saved = store.get(&"a".into()).await.unwrap().unwrap();
        assert_eq!(saved.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn empty_queue_yields_nothing() {
        let (_store, consumer, _clock) = setup(succeeding()).await;
        assert_eq!(consumer.process_next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failure_with_budget_left_is_re_delayed() {
        let (store, consumer, clock) = setup(failing()).await;
        store
            .enqueue(Task::new("t").with_id("a").with_max_attempts(3))
            .await
            .unwrap();

        let outcome = consumer.process_next().await.unwrap().unwrap();
        let Outcome::RetryScheduled { attempts, run_at } = outcome else {
            panic!("expected a retry, got {outcome:?}");
        };
        assert_eq!(attempts, 1);
        let delay = (run_at - clock.now()).num_milliseconds();
        assert!((80..=120).contains(&delay), "delay {delay}ms");

        assert_eq!(store.pending_count().await, 0);
        assert_eq!(store.due(run_at, 10).await.unwrap(), vec![TaskId::new("a")]);

        let saved = store.get(&"a".into()).await.unwrap().unwrap();
        assert_eq!(saved.status, TaskStatus::Delayed);
        assert_eq!(saved.attempts, 1);
        assert_eq!(saved.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn exhausted_budget_goes_to_dead_letter_once() {
        let (store, consumer, clock) = setup(failing()).await;
        store
            .enqueue(Task::new("t").with_id("a").with_max_attempts(1))
            .await
            .unwrap();

        let outcome = consumer.process_next().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: "boom".to_string()
            }
        );
        assert!(store
            .due(clock.now() + chrono::Duration::days(1), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.dead_letters(10).await.unwrap().len(), 1);
        assert_eq!(store.pending_count().await, 0);
    }

    #[test]
    fn retry_time_falls_back_when_the_delay_overflows() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hour = Duration::from_secs(3600);

        assert_eq!(retry_at(now, hour, hour), now + chrono::Duration::hours(1));
        assert_eq!(retry_at(now, Duration::MAX, hour), now + chrono::Duration::hours(1));
        assert_eq!(retry_at(now, Duration::MAX, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn absurd_backoff_still_schedules_the_retry() {
        let (store, _consumer, clock) = setup(failing()).await;
        let config = ConsumerConfig::new("w1")
            .with_block(Duration::ZERO)
            .with_backoff(Duration::from_millis(u64::MAX), Duration::from_millis(u64::MAX));
        let consumer = Consumer::new(store.clone(), failing(), config).with_clock(clock.clone());
        store
            .enqueue(Task::new("t").with_id("a").with_max_attempts(3))
            .await
            .unwrap();

        let outcome = consumer.process_next().await.unwrap().unwrap();
        let Outcome::RetryScheduled { attempts, run_at } = outcome else {
            panic!("expected a retry, got {outcome:?}");
        };
        assert_eq!(attempts, 1);
        let year_later = clock.now() + chrono::Duration::days(365);
        assert!(run_at > year_later);
        let scheduled = store.scheduled_at(&TaskId::new("a")).await;
        assert!(scheduled.is_some_and(|at| at > year_later));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (_store, consumer, _clock) = setup(succeeding()).await;
        let (trigger, shutdown) = crate::app::ShutdownTrigger::new();
        trigger.trigger();

        let result = consumer.run(shutdown).await;
        assert!(matches!(result, Err(StreamqError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn claim_errors_pause_then_retry() {
        let (store, consumer, _clock) =
            setup_with_block(succeeding(), Duration::from_millis(100)).await;
        store.set_unavailable(true);
        let (trigger, shutdown) = crate::app::ShutdownTrigger::new();

        let handle = tokio::spawn(async move { consumer.run(shutdown).await });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        store.set_unavailable(false);
        store.enqueue(Task::new("t").with_id("late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        trigger.trigger();
        assert!(matches!(handle.await.unwrap(), Err(StreamqError::Cancelled)));
        let saved = store.get(&"late".into()).await.unwrap().unwrap();
        assert_eq!(saved.status, TaskStatus::Done);
    }
}
