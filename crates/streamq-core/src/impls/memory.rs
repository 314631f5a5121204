//! In-memory store: a single-process model of the shared store.
//!
//! Models everything the Redis adapter relies on:
//! - live log with one consumer group (delivery cursor + pending entries)
//! - dead-letter log
//! - time-ordered set of delayed ids
//! - per-task field maps
//!
//! All state sits behind one async mutex, so every operation is atomic. Useful for
//! tests and local runs; `set_unavailable(true)` simulates a store outage, and
//! `fail_acks` / `fail_promotions` break a single operation while the rest works.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::codec::{self, REASON_FIELD, TASK_FIELD};
use crate::config::QueueConfig;
use crate::domain::record::{self, epoch_ms};
use crate::domain::{
    DEFAULT_MAX_ATTEMPTS, DeadLetter, EntryId, QueueError, Task, TaskId, TaskStatus,
};
use crate::ports::{
    Bootstrap, Claimed, Clock, DeadLetterLog, DelayIndex, IdGenerator, Queue, SystemClock,
    UlidGenerator,
};

#[derive(Debug, Clone)]
struct LogEntry {
    id: EntryId,
    fields: HashMap<String, String>,
}

impl LogEntry {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    /// Store-clock ms of the latest delivery; idle time counts from here.
    delivered_at: i64,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next never-delivered entry in the live log.
    cursor: usize,
    /// Delivered but not yet acknowledged.
    pending: HashMap<EntryId, PendingEntry>,
}

impl GroupState {
    /// The longest-idle pending entry, if it has been idle for `min_idle_ms`.
    fn idle_entry(&self, now_ms: i64, min_idle_ms: i64) -> Option<EntryId> {
        self.pending
            .iter()
            .filter(|(_, p)| now_ms - p.delivered_at >= min_idle_ms)
            .min_by_key(|(_, p)| p.delivered_at)
            .map(|(id, _)| id.clone())
    }
}

#[derive(Debug, Default)]
struct StoreState {
    last_ms: i64,
    seq: u64,
    live: Vec<LogEntry>,
    dead: Vec<LogEntry>,
    group: Option<GroupState>,
    /// (due ms, id), ordered by due time.
    scheduled: BTreeSet<(i64, TaskId)>,
    scores: HashMap<TaskId, i64>,
    records: HashMap<TaskId, HashMap<String, String>>,
}

impl StoreState {
    /// Stream-style ids: `<ms>-<seq>`, strictly increasing even if the clock stalls.
    fn next_entry_id(&mut self, now_ms: i64) -> EntryId {
        if now_ms > self.last_ms {
            self.last_ms = now_ms;
            self.seq = 0;
        } else {
            self.seq += 1;
        }
        EntryId::new(format!("{}-{}", self.last_ms, self.seq))
    }

    fn append_live(&mut self, now_ms: i64, fields: HashMap<String, String>) -> EntryId {
        let id = self.next_entry_id(now_ms);
        self.live.push(LogEntry {
            id: id.clone(),
            fields,
        });
        id
    }

    fn write_record(&mut self, task: &Task) {
        self.records
            .entry(task.id.clone())
            .or_default()
            .extend(record::to_fields(task));
    }

    fn schedule(&mut self, id: &TaskId, score: i64) {
        if let Some(old) = self.scores.insert(id.clone(), score) {
            self.scheduled.remove(&(old, id.clone()));
        }
        self.scheduled.insert((score, id.clone()));
    }

    fn unschedule(&mut self, id: &TaskId) {
        if let Some(score) = self.scores.remove(id) {
            self.scheduled.remove(&(score, id.clone()));
        }
    }
}

/// In-memory implementation of every store port.
pub struct InMemoryStore {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: Mutex<StoreState>,
    notify: Notify,
    unavailable: AtomicBool,
    ack_fault: AtomicBool,
    promote_fault: AtomicBool,
}

impl InMemoryStore {
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            config,
            clock,
            ids,
            state: Mutex::new(StoreState::default()),
            notify: Notify::new(),
            unavailable: AtomicBool::new(false),
            ack_fault: AtomicBool::new(false),
            promote_fault: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Simulate an outage: while set, every operation fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `ack` fail with `StoreUnavailable`.
    pub fn fail_acks(&self, fail: bool) {
        self.ack_fault.store(fail, Ordering::SeqCst);
    }

    /// Make only `promote` fail with `StoreUnavailable`.
    pub fn fail_promotions(&self, fail: bool) {
        self.promote_fault.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::StoreUnavailable(format!(
                "in-memory store {} is marked unavailable",
                self.config.stream_key
            )));
        }
        Ok(())
    }

    fn check_fault(&self, fault: &AtomicBool, operation: &str) -> Result<(), QueueError> {
        self.check_available()?;
        if fault.load(Ordering::SeqCst) {
            return Err(QueueError::StoreUnavailable(format!(
                "in-memory store {} rejected {operation}",
                self.config.stream_key
            )));
        }
        Ok(())
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Assign an id and the default retry budget where the producer left them unset.
    fn fill_defaults(&self, task: &mut Task) {
        if !task.id.is_assigned() {
            task.id = self.ids.generate_task_id();
        }
        if task.max_attempts == 0 {
            task.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
    }

    fn no_group(&self) -> QueueError {
        QueueError::NoGroup {
            stream: self.config.stream_key.clone(),
            group: self.config.group.clone(),
        }
    }

    /// Append arbitrary fields to the live log (e.g. an entry from another producer).
    pub async fn append_raw(&self, fields: &[(&str, &str)]) -> EntryId {
        let now_ms = self.now_ms();
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let id = self.state.lock().await.append_live(now_ms, fields);
        self.notify.notify_one();
        id
    }

    /// Decoded snapshots of every live-log entry, in append order.
    pub async fn live_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        state
            .live
            .iter()
            .filter_map(|e| {
                e.field(TASK_FIELD)
                    .and_then(|raw| codec::decode_task(&e.id, raw).ok())
            })
            .collect()
    }

    /// Number of delivered-but-unacknowledged entries.
    pub async fn pending_count(&self) -> usize {
        let state = self.state.lock().await;
        state.group.as_ref().map_or(0, |g| g.pending.len())
    }

    /// Consumer currently holding a pending entry, and how often it was delivered.
    pub async fn pending_owner(&self, entry_id: &EntryId) -> Option<(String, u32)> {
        let state = self.state.lock().await;
        state
            .group
            .as_ref()
            .and_then(|g| g.pending.get(entry_id))
            .map(|p| (p.consumer.clone(), p.deliveries))
    }

    /// Number of entries not yet delivered to the group.
    pub async fn undelivered_count(&self) -> usize {
        let state = self.state.lock().await;
        let cursor = state.group.as_ref().map_or(0, |g| g.cursor);
        state.live.len().saturating_sub(cursor)
    }

    pub async fn scheduled_at(&self, id: &TaskId) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.scores.get(id).copied().and_then(record::from_epoch_ms)
    }

    #[cfg(test)]
    pub(crate) async fn drop_record(&self, id: &TaskId) {
        self.state.lock().await.records.remove(id);
    }

    /// Raw record fields, as a reader doing a partial read would see them.
    pub async fn record_field(&self, id: &TaskId, field: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.records.get(id).and_then(|r| r.get(field).cloned())
    }
}

#[async_trait]
impl Queue for InMemoryStore {
    async fn enqueue(&self, mut task: Task) -> Result<EntryId, QueueError> {
        self.check_available()?;
        self.fill_defaults(&mut task);
        task.status = TaskStatus::Queued;
        task.created_at = Some(self.clock.now());

        let payload = codec::encode_task(&task)?;
        let entry_id = {
            let mut state = self.state.lock().await;
            let id = state.append_live(
                self.now_ms(),
                HashMap::from([(TASK_FIELD.to_string(), payload)]),
            );
            state.write_record(&task);
            id
        };
        self.notify.notify_one();

        debug!(task_id = %task.id, entry_id = %entry_id, "task enqueued");
        Ok(entry_id)
    }

    async fn enqueue_delayed(
        &self,
        mut task: Task,
        run_at: DateTime<Utc>,
    ) -> Result<TaskId, QueueError> {
        self.check_available()?;
        self.fill_defaults(&mut task);
        task.status = TaskStatus::Delayed;
        task.next_run_at = Some(run_at);
        if task.created_at.is_none() {
            task.created_at = Some(self.clock.now());
        }

        // Record and index under one lock: never one without the other.
        let mut state = self.state.lock().await;
        state.write_record(&task);
        state.schedule(&task.id, epoch_ms(Some(run_at)));

        debug!(task_id = %task.id, %run_at, "task delayed");
        Ok(task.id)
    }

    async fn claim(&self, consumer: &str, block: Duration) -> Result<Option<Claimed>, QueueError> {
        self.check_available()?;
        let deadline = tokio::time::Instant::now() + block;
        let min_idle_ms = self.config.reclaim_idle.as_millis() as i64;

        loop {
            {
                let now_ms = self.now_ms();
                let mut state = self.state.lock().await;
                let StoreState { live, group, .. } = &mut *state;
                let group = group.as_mut().ok_or_else(|| self.no_group())?;

                // Idle pending entries first, then never-delivered ones.
                let reclaimed = match min_idle_ms {
                    0 => None,
                    _ => group.idle_entry(now_ms, min_idle_ms),
                };
                let entry = match reclaimed {
                    Some(id) => {
                        let entry = live.iter().find(|e| e.id == id);
                        if let Some(p) = group.pending.get_mut(&id) {
                            debug!(entry_id = %id, from = %p.consumer, to = consumer, "reclaiming idle entry");
                            p.consumer = consumer.to_string();
                            p.delivered_at = now_ms;
                            p.deliveries += 1;
                        }
                        entry
                    }
                    None => {
                        let entry = live.get(group.cursor);
                        if let Some(entry) = entry {
                            group.cursor += 1;
                            group.pending.insert(
                                entry.id.clone(),
                                PendingEntry {
                                    consumer: consumer.to_string(),
                                    delivered_at: now_ms,
                                    deliveries: 1,
                                },
                            );
                        }
                        entry
                    }
                };

                if let Some(entry) = entry {
                    let raw = entry.field(TASK_FIELD).unwrap_or_default();
                    let task = codec::decode_task(&entry.id, raw)?;
                    return Ok(Some(Claimed {
                        entry_id: entry.id.clone(),
                        task,
                    }));
                }
            }

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, entry_id: &EntryId) -> Result<(), QueueError> {
        self.check_fault(&self.ack_fault, "ack")?;
        let mut state = self.state.lock().await;
        let group = state.group.as_mut().ok_or_else(|| self.no_group())?;
        group.pending.remove(entry_id);
        Ok(())
    }

    async fn fail(
        &self,
        _entry_id: &EntryId,
        task: &mut Task,
        cause: &str,
    ) -> Result<(), QueueError> {
        task.attempts += 1;
        task.last_error = Some(cause.to_string());
        self.save_state(task).await
    }

    async fn to_dlq(
        &self,
        entry_id: &EntryId,
        task: &mut Task,
        reason: &str,
    ) -> Result<(), QueueError> {
        self.check_available()?;
        let body = codec::encode_dead_letter(task, reason)?;
        {
            let mut state = self.state.lock().await;
            let id = state.next_entry_id(self.now_ms());
            state.dead.push(LogEntry {
                id,
                fields: HashMap::from([
                    (TASK_FIELD.to_string(), body),
                    (REASON_FIELD.to_string(), reason.to_string()),
                ]),
            });
        }

        let acked = self.ack(entry_id).await;
        if let Err(e) = &acked {
            warn!(task_id = %task.id, %entry_id, error = %e, "dead-lettered entry not acknowledged");
        }

        task.status = TaskStatus::Failed;
        task.last_error = Some(reason.to_string());
        self.save_state(task).await?;
        acked
    }

    async fn save_state(&self, task: &Task) -> Result<(), QueueError> {
        self.check_available()?;
        self.state.lock().await.write_record(task);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, QueueError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(id)
            .and_then(|fields| record::from_fields(id, fields)))
    }
}

#[async_trait]
impl DelayIndex for InMemoryStore {
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskId>, QueueError> {
        self.check_available()?;
        let now_ms = now.timestamp_millis();
        let state = self.state.lock().await;
        Ok(state
            .scheduled
            .iter()
            .take_while(|(score, _)| *score <= now_ms)
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn promote(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> Result<Option<EntryId>, QueueError> {
        self.check_fault(&self.promote_fault, "promote")?;
        let payload = codec::encode_task(task)?;

        let entry_id = {
            let mut state = self.state.lock().await;
            match state.scores.get(&task.id) {
                Some(&score) if score <= now.timestamp_millis() => {}
                _ => return Ok(None),
            }
            let id = state.append_live(
                self.now_ms(),
                HashMap::from([(TASK_FIELD.to_string(), payload)]),
            );
            state.unschedule(&task.id);
            if let Some(fields) = state.records.get_mut(&task.id) {
                fields.insert(
                    record::FIELD_STATUS.to_string(),
                    TaskStatus::Queued.as_str().to_string(),
                );
                fields.insert(record::FIELD_NEXT_RUN_AT.to_string(), "0".to_string());
            }
            id
        };
        self.notify.notify_one();
        Ok(Some(entry_id))
    }

    async fn unschedule(&self, id: &TaskId) -> Result<(), QueueError> {
        self.check_available()?;
        self.state.lock().await.unschedule(id);
        Ok(())
    }
}

#[async_trait]
impl Bootstrap for InMemoryStore {
    async fn create_group(&self) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.group.is_some() {
            return Err(QueueError::SetupConflict {
                stream: self.config.stream_key.clone(),
                group: self.config.group.clone(),
            });
        }
        state.group = Some(GroupState::default());
        Ok(())
    }
}

#[async_trait]
impl DeadLetterLog for InMemoryStore {
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        self.check_available()?;
        let state = self.state.lock().await;
        state
            .dead
            .iter()
            .rev()
            .take(limit)
            .map(|e| codec::decode_dead_letter(&e.id, e.field(TASK_FIELD).unwrap_or_default()))
            .collect()
    }
}
