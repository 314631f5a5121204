//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **Enqueuer**: producer の入口（即時 / 遅延の振り分け）
//! - **Consumer**: claim → handle → ack / retry / DLQ のループ
//! - **Scheduler**: 期限の来た遅延タスクを live log に昇格させるループ
//! - **HandlerRegistry**: task_type → handler の振り分け
//! - **WorkerGroup**: Scheduler と N 個の Consumer を 1 プロセスで束ねる
//! - **Shutdown**: 全ループ共通の停止シグナル

pub mod consumer;
pub mod enqueuer;
pub mod handler;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use self::consumer::{Consumer, Outcome};
pub use self::enqueuer::{Enqueuer, TaskRequest};
pub use self::handler::{FnHandler, HandlerRegistry, RegistryError, TaskHandler, handler_fn};
pub use self::scheduler::{Scheduler, TickReport};
pub use self::shutdown::{Shutdown, ShutdownTrigger};
pub use self::worker::{WorkerGroup, WorkerOptions, consumer_names};
