//! streamq-core
//!
//! At-least-once job queue on a stream-with-consumer-groups store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, record layout, errors）
//! - **ports**: 抽象化レイヤー（Queue, DelayIndex, Bootstrap, DeadLetterLog, Clock, IdGenerator）
//! - **impls**: ports の実装（InMemoryStore、feature `redis` で RedisStreamQueue）
//! - **app**: Enqueuer / Consumer / Scheduler / WorkerGroup
//! - **retry**: backoff 計算（指数 + ±20% jitter）
//! - **config**: キー名・ループ設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod retry;

pub use self::app::{
    Consumer, Enqueuer, HandlerRegistry, Scheduler, Shutdown, ShutdownTrigger, TaskHandler,
    TaskRequest, WorkerGroup, WorkerOptions, handler_fn,
};
pub use self::config::{ConsumerConfig, QueueConfig, SchedulerConfig};
pub use self::domain::{
    DeadLetter, EntryId, HandlerError, QueueError, StreamqError, Task, TaskId, TaskStatus,
};
pub use self::retry::Backoff;
