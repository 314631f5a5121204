//! Command line: every setting is a flag with an environment fallback.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use streamq_core::config::{ConsumerConfig, QueueConfig, SchedulerConfig};
use streamq_core::observability::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "streamq")]
#[command(about = "At-least-once job queue on Redis streams")]
#[command(version)]
pub struct Cli {
    /// Redis connection URL
    #[arg(long, global = true, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    /// Log output format (text or json)
    #[arg(long, global = true, env = "STREAMQ_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP submission endpoint
    Api {
        #[arg(long, env = "STREAMQ_PORT", default_value_t = 8080)]
        port: u16,
        #[arg(long, env = "STREAMQ_HOST", default_value = "0.0.0.0")]
        host: String,
    },

    /// Run the delay scheduler and consumer loops
    Worker(WorkerArgs),

    /// Print a task's durable record
    Task {
        /// Task id
        id: String,
    },

    /// Print the most recent dead-letter records
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Args)]
pub struct QueueArgs {
    #[arg(long, global = true, env = "STREAMQ_STREAM_KEY", default_value = "streamq:tasks")]
    pub stream_key: String,
    #[arg(long, global = true, env = "STREAMQ_GROUP", default_value = "streamq-workers")]
    pub group: String,
    #[arg(
        long,
        global = true,
        env = "STREAMQ_SCHEDULED_KEY",
        default_value = "streamq:tasks:scheduled"
    )]
    pub scheduled_key: String,
    #[arg(long, global = true, env = "STREAMQ_DLQ_KEY", default_value = "streamq:tasks:dlq")]
    pub dlq_key: String,
    #[arg(long, global = true, env = "STREAMQ_TASK_PREFIX", default_value = "streamq:task:")]
    pub task_prefix: String,
    /// Idle time after which another worker may take over an unacknowledged entry (0 = never)
    #[arg(long, global = true, env = "STREAMQ_RECLAIM_IDLE_MS", default_value_t = 60_000)]
    pub reclaim_idle_ms: u64,
}

impl QueueArgs {
    pub fn to_config(&self) -> QueueConfig {
        QueueConfig {
            stream_key: self.stream_key.clone(),
            group: self.group.clone(),
            scheduled_key: self.scheduled_key.clone(),
            dlq_key: self.dlq_key.clone(),
            task_key_prefix: self.task_prefix.clone(),
            reclaim_idle: Duration::from_millis(self.reclaim_idle_ms),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    /// Consumer identity; extra loops get `-2`, `-3`, ... suffixes
    #[arg(long, env = "STREAMQ_CONSUMER", default_value = "worker-1")]
    pub consumer: String,
    #[arg(long, env = "STREAMQ_BASE_BACKOFF_MS", default_value_t = 500)]
    pub base_backoff_ms: u64,
    #[arg(long, env = "STREAMQ_MAX_BACKOFF_MS", default_value_t = 30_000)]
    pub max_backoff_ms: u64,
    /// Number of consumer identities in this process
    #[arg(long, env = "STREAMQ_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,
    #[arg(long, env = "STREAMQ_BLOCK_MS", default_value_t = 5_000)]
    pub block_ms: u64,
    #[arg(long, env = "STREAMQ_POLL_INTERVAL_MS", default_value_t = 1_000)]
    pub poll_interval_ms: u64,
    #[arg(long, env = "STREAMQ_SCHEDULER_BATCH", default_value_t = 128)]
    pub scheduler_batch: usize,
}

impl WorkerArgs {
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.consumer.clone())
            .with_block(Duration::from_millis(self.block_ms))
            .with_backoff(
                Duration::from_millis(self.base_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            )
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            batch: self.scheduler_batch,
            ..SchedulerConfig::default()
        }
    }
}
