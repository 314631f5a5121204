//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: 単一プロセス用・テスト用（全 port をひとつのロックで実装）
//! - **RedisStreamQueue**: 本番用（feature `redis`）
//!
//! どちらも `codec`（ログエントリ）と `domain::record`（durable record）を共有するので、
//! 保存フォーマットは実装間で一致します。

pub mod codec;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStreamQueue;
