//! Bus implementations.
//!
//! Concrete implementations of the domain-level `Bus` and `BusConnector`
//! traits. Broker-backed buses are hidden behind feature flags; the
//! in-memory bus is always available.
//!
//! Connection-layer code must not depend on bus-specific types.

mod memory;
mod redis;

pub use memory::{MemoryBus, MemoryConnector, MemoryHub, MEMORY_DEFAULT_URL, MEMORY_SCHEME};

#[cfg(feature = "bus_redis")]
pub use self::redis::{RedisBus, RedisConnector, REDIS_DEFAULT_URL, REDIS_SCHEME};

pub use self::redis::redis_connector;
