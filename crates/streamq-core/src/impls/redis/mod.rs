//! Redis adapter: live log = stream + consumer group, delayed set = sorted set,
//! durable record = hash, dead-letter log = second stream.

mod per_consumer;
mod queue;

pub use self::queue::RedisStreamQueue;
