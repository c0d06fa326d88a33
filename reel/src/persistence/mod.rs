/// In-process job store and task queue.
pub mod memory;

/// Redis-backed job store and task queue.
///
/// Enabled by the `redis` feature.
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
