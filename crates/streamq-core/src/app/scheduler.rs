//! Delay scheduler: promotes due delayed tasks into the live log.
//!
//! 複数プロセスで同時に走らせてもよい。append・セットからの削除・`status=queued`
//! の記録は 1 つの原子操作（`DelayIndex::promote`）で、ID がまだ期限内でセットに
//! ある場合だけ行う。先に昇格した scheduler や、再遅延した consumer の結果を
//! 上書きすることはない。
//!
//! # 失敗時の方針
//! - 遅延セットの読み出し失敗: error ログを出して次の tick で再試行（ループは止めない）
//! - durable record が無い ID: warn ログを出してセットから取り除く
//! - promote 失敗: ID をセットに残して次の tick で再試行

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::shutdown::Shutdown;
use crate::config::SchedulerConfig;
use crate::domain::{QueueError, StreamqError, TaskId, TaskStatus};
use crate::ports::{Clock, DelayIndex, Queue, SystemClock};

/// Per-tick counts, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub promoted: usize,
    pub missing: usize,
    /// Already promoted elsewhere, or rescheduled into the future meanwhile.
    pub skipped: usize,
    pub failed: usize,
}

enum Promotion {
    Promoted,
    Missing,
    Skipped,
}

pub struct Scheduler<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl<S> Scheduler<S>
where
    S: Queue + DelayIndex + ?Sized,
{
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// One promotion pass over at most `batch` due ids.
    ///
    /// Only a failure to read the due set is returned; per-id failures are counted
    /// in the report and retried next tick.
    pub async fn tick(&self) -> Result<TickReport, QueueError> {
        let now = self.clock.now();
        let due = self.store.due(now, self.config.batch).await?;

        let mut report = TickReport::default();
        for id in due {
            match self.promote(&id, now).await {
                Ok(Promotion::Promoted) => report.promoted += 1,
                Ok(Promotion::Missing) => report.missing += 1,
                Ok(Promotion::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(task_id = %id, error = %e, "promotion failed, will retry");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn promote(&self, id: &TaskId, now: DateTime<Utc>) -> Result<Promotion, QueueError> {
        let Some(mut task) = self.store.get(id).await? else {
            warn!(task_id = %id, "scheduled task has no record, dropping it");
            self.store.unschedule(id).await?;
            return Ok(Promotion::Missing);
        };

        task.status = TaskStatus::Queued;
        task.next_run_at = None;

        match self.store.promote(&task, now).await? {
            Some(entry_id) => {
                debug!(task_id = %id, %entry_id, attempts = task.attempts, "task promoted");
                Ok(Promotion::Promoted)
            }
            None => {
                debug!(task_id = %id, "task no longer due, left alone");
                Ok(Promotion::Skipped)
            }
        }
    }

    /// Tick on `interval` until shutdown. Always returns `Err(StreamqError::Cancelled)`.
    pub async fn run(&self, shutdown: Shutdown) -> Result<(), StreamqError> {
        let period = self.config.interval.max(std::time::Duration::from_millis(1));
        let start = if self.config.immediate_first_tick {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = period.as_millis() as u64, "scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return Err(StreamqError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.promoted > 0 || report.failed > 0 => {
                    info!(
                        promoted = report.promoted,
                        missing = report.missing,
                        skipped = report.skipped,
                        failed = report.failed,
                        "scheduler tick"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "failed to read due tasks, retrying next tick"),
            }
        }
    }
}
