//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は共有ストア（Redis Streams など）へのインターフェースを提供し、
//! 実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有ストアの原子操作（consumer group claim / append / zrem）に安全性を委ねる
//! - コア側はプロセスをまたぐロックを持たない

pub mod bootstrap;
pub mod clock;
pub mod dead_letter;
pub mod delay_index;
pub mod id_generator;
pub mod queue;

pub use self::bootstrap::Bootstrap;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dead_letter::DeadLetterLog;
pub use self::delay_index::DelayIndex;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue::{Claimed, Queue};
