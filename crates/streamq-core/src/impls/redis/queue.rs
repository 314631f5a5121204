use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{AsyncCommands, RedisError, Script};
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::domain::record::{self, epoch_ms};
use crate::domain::{
    DEFAULT_MAX_ATTEMPTS, DeadLetter, EntryId, QueueError, Task, TaskId, TaskStatus,
};
use super::per_consumer::PerConsumer;
use crate::impls::codec::{self, REASON_FIELD, TASK_FIELD};
use crate::ports::{
    Bootstrap, Claimed, Clock, DeadLetterLog, DelayIndex, IdGenerator, Queue, SystemClock,
    UlidGenerator,
};

/// Pending entries inspected per reclaim attempt.
const RECLAIM_SCAN: usize = 16;

/// Atomic promotion of one delayed task.
///
/// KEYS: scheduled set, live stream, task record.
/// ARGV: task id, now (epoch ms), task field name, snapshot, status field,
/// queued status, next_run_at field.
///
/// Returns the new entry id, or nil when the id is gone from the set or is no
/// longer due.
const PROMOTE_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score or tonumber(score) > tonumber(ARGV[2]) then
    return false
end
local id = redis.call('XADD', KEYS[2], '*', ARGV[3], ARGV[4])
redis.call('ZREM', KEYS[1], ARGV[1])
if redis.call('EXISTS', KEYS[3]) == 1 then
    redis.call('HSET', KEYS[3], ARGV[5], ARGV[6], ARGV[7], '0')
end
return id
"#;

/// Redis Streams backed queue.
///
/// `conn` carries every short command. Each consumer identity gets its own
/// connection for `XREADGROUP BLOCK`: Redis serves blocking reads one at a time
/// per connection, so a shared one would queue consumers behind each other.
pub struct RedisStreamQueue {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: PerConsumer<ConnectionManager>,
    promote_script: Script,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl RedisStreamQueue {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `redis_url` - e.g. `redis://localhost:6379`
    /// * `config` - key and group names
    pub async fn connect(redis_url: &str, config: QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            QueueError::StoreUnavailable(format!("invalid redis url {redis_url}: {e}"))
        })?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(store_error)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            client,
            conn,
            blocking: PerConsumer::default(),
            promote_script: Script::new(PROMOTE_SCRIPT),
            config,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
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

    /// The blocking-read connection of `consumer`, opened on first use.
    async fn blocking_conn(&self, consumer: &str) -> Result<ConnectionManager, QueueError> {
        self.blocking
            .get_or_try_init(consumer, || async {
                debug!(consumer, "opening blocking connection");
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(store_error)
            })
            .await
    }

    /// Take over one pending entry idle for at least `reclaim_idle`
    /// (XPENDING + XCLAIM). XCLAIM re-checks the idle time, so two consumers
    /// racing for the same entry cannot both get it.
    async fn reclaim(&self, consumer: &str) -> Result<Option<StreamId>, QueueError> {
        let min_idle = self.config.reclaim_idle.as_millis() as usize;
        if min_idle == 0 {
            return Ok(None);
        }

        let mut conn = self.conn.clone();
        let pending: StreamPendingCountReply = conn
            .xpending_count(
                &self.config.stream_key,
                &self.config.group,
                "-",
                "+",
                RECLAIM_SCAN,
            )
            .await
            .map_err(|e| self.classify(e))?;

        for idle in pending.ids.iter().filter(|p| p.last_delivered_ms >= min_idle) {
            let reply: StreamClaimReply = conn
                .xclaim(
                    &self.config.stream_key,
                    &self.config.group,
                    consumer,
                    min_idle,
                    &[idle.id.as_str()],
                )
                .await
                .map_err(|e| self.classify(e))?;
            if let Some(entry) = reply.ids.into_iter().next() {
                debug!(
                    entry_id = %entry.id,
                    from = %idle.consumer,
                    to = consumer,
                    deliveries = idle.times_delivered + 1,
                    "reclaimed idle entry"
                );
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn classify(&self, e: RedisError) -> QueueError {
        match e.code() {
            Some("BUSYGROUP") => QueueError::SetupConflict {
                stream: self.config.stream_key.clone(),
                group: self.config.group.clone(),
            },
            Some("NOGROUP") => QueueError::NoGroup {
                stream: self.config.stream_key.clone(),
                group: self.config.group.clone(),
            },
            _ => store_error(e),
        }
    }
}

fn store_error(e: RedisError) -> QueueError {
    QueueError::StoreUnavailable(e.to_string())
}

fn task_field(entry: &StreamId) -> Result<String, QueueError> {
    entry
        .get::<String>(TASK_FIELD)
        .ok_or_else(|| QueueError::Decode {
            entry_id: EntryId::new(entry.id.clone()),
            reason: format!("missing `{TASK_FIELD}` field"),
        })
}

/// `XREADGROUP` options for a single entry. `BLOCK 0` means "forever" to Redis,
/// so a zero duration becomes a non-blocking read instead.
fn read_options(group: &str, consumer: &str, block: Duration) -> StreamReadOptions {
    let options = StreamReadOptions::default().group(group, consumer).count(1);
    if block.is_zero() {
        options
    } else {
        options.block(block.as_millis().max(1) as usize)
    }
}

#[async_trait]
impl Queue for RedisStreamQueue {
    async fn enqueue(&self, mut task: Task) -> Result<EntryId, QueueError> {
        self.fill_defaults(&mut task);
        task.status = TaskStatus::Queued;
        task.created_at = Some(self.clock.now());

        let payload = codec::encode_task(&task)?;
        let mut conn = self.conn.clone();
        let entry_id: String = conn
            .xadd(&self.config.stream_key, "*", &[(TASK_FIELD, payload.as_str())])
            .await
            .map_err(|e| self.classify(e))?;

        // The log entry is the delivery record; the hash is a derived view.
        if let Err(e) = self.save_state(&task).await {
            warn!(task_id = %task.id, %entry_id, error = %e, "failed to record enqueued task state");
        }

        debug!(task_id = %task.id, %entry_id, "task enqueued");
        Ok(EntryId::new(entry_id))
    }

    async fn enqueue_delayed(
        &self,
        mut task: Task,
        run_at: DateTime<Utc>,
    ) -> Result<TaskId, QueueError> {
        self.fill_defaults(&mut task);
        task.status = TaskStatus::Delayed;
        task.next_run_at = Some(run_at);
        if task.created_at.is_none() {
            task.created_at = Some(self.clock.now());
        }

        // MULTI/EXEC: the record and the index entry land together or not at all.
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(
                self.config.task_key(task.id.as_str()),
                &record::to_fields(&task),
            )
            .ignore()
            .zadd(
                &self.config.scheduled_key,
                task.id.as_str(),
                epoch_ms(Some(run_at)),
            )
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.classify(e))?;

        debug!(task_id = %task.id, %run_at, "task delayed");
        Ok(task.id)
    }

    async fn claim(&self, consumer: &str, block: Duration) -> Result<Option<Claimed>, QueueError> {
        let entry = match self.reclaim(consumer).await? {
            Some(entry) => entry,
            None => {
                let mut conn = self.blocking_conn(consumer).await?;
                let options = read_options(&self.config.group, consumer, block);
                let reply: Option<StreamReadReply> = conn
                    .xread_options(&[&self.config.stream_key], &[">"], &options)
                    .await
                    .map_err(|e| self.classify(e))?;

                let Some(entry) = reply
                    .into_iter()
                    .flat_map(|r| r.keys)
                    .flat_map(|k| k.ids)
                    .next()
                else {
                    return Ok(None);
                };
                entry
            }
        };

        let entry_id = EntryId::new(entry.id.clone());
        let task = codec::decode_task(&entry_id, &task_field(&entry)?)?;
        Ok(Some(Claimed { entry_id, task }))
    }

    async fn ack(&self, entry_id: &EntryId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.xack::<_, _, _, ()>(
            &self.config.stream_key,
            &self.config.group,
            &[entry_id.as_str()],
        )
        .await
        .map_err(|e| self.classify(e))
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
        let body = codec::encode_dead_letter(task, reason)?;
        let mut conn = self.conn.clone();
        conn.xadd::<_, _, _, _, ()>(
            &self.config.dlq_key,
            "*",
            &[(TASK_FIELD, body.as_str()), (REASON_FIELD, reason)],
        )
        .await
        .map_err(|e| self.classify(e))?;

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
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(
            self.config.task_key(task.id.as_str()),
            &record::to_fields(task),
        )
        .await
        .map_err(|e| self.classify(e))
    }

    async fn get(&self, id: &TaskId) -> Result<Option<Task>, QueueError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.config.task_key(id.as_str()))
            .await
            .map_err(|e| self.classify(e))?;
        Ok(record::from_fields(id, &fields))
    }
}

#[async_trait]
impl DelayIndex for RedisStreamQueue {
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskId>, QueueError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                &self.config.scheduled_key,
                "-inf",
                now.timestamp_millis(),
                0,
                limit as isize,
            )
            .await
            .map_err(|e| self.classify(e))?;
        Ok(ids.into_iter().map(TaskId::new).collect())
    }

    async fn promote(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> Result<Option<EntryId>, QueueError> {
        let payload = codec::encode_task(task)?;
        let mut conn = self.conn.clone();
        let entry_id: Option<String> = self
            .promote_script
            .key(&self.config.scheduled_key)
            .key(&self.config.stream_key)
            .key(self.config.task_key(task.id.as_str()))
            .arg(task.id.as_str())
            .arg(now.timestamp_millis())
            .arg(TASK_FIELD)
            .arg(payload)
            .arg(record::FIELD_STATUS)
            .arg(TaskStatus::Queued.as_str())
            .arg(record::FIELD_NEXT_RUN_AT)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(entry_id.map(EntryId::new))
    }

    async fn unschedule(&self, id: &TaskId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(&self.config.scheduled_key, id.as_str())
            .await
            .map_err(|e| self.classify(e))
    }
}

#[async_trait]
impl Bootstrap for RedisStreamQueue {
    async fn create_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.xgroup_create_mkstream::<_, _, _, ()>(&self.config.stream_key, &self.config.group, "0")
            .await
            .map_err(|e| self.classify(e))
    }
}

#[async_trait]
impl DeadLetterLog for RedisStreamQueue {
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrevrange_count(&self.config.dlq_key, "+", "-", limit)
            .await
            .map_err(|e| self.classify(e))?;

        reply
            .ids
            .iter()
            .map(|entry| {
                codec::decode_dead_letter(&EntryId::new(entry.id.clone()), &task_field(entry)?)
            })
            .collect()
    }
}
