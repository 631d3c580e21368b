//! Redis pub/sub bus.
//!
//! Available with the `bus_redis` feature. Without it, [`redis_connector`]
//! is a stub that reports the backend as unsupported so callers can fall
//! back to another bus.

#[cfg(feature = "bus_redis")]
mod pubsub;

#[cfg(feature = "bus_redis")]
pub use pubsub::{RedisBus, RedisConnector, REDIS_DEFAULT_URL, REDIS_SCHEME};

/// Connector for the Redis pub/sub bus.
#[cfg(feature = "bus_redis")]
pub fn redis_connector() -> crate::Result<crate::BusConnectorPtr> {
    Ok(std::sync::Arc::new(RedisConnector))
}

/// Connector for the Redis pub/sub bus.
#[cfg(not(feature = "bus_redis"))]
pub fn redis_connector() -> crate::Result<crate::BusConnectorPtr> {
    Err(crate::TransportError::NotSupported(
        "bus_redis feature is not enabled".into(),
    ))
}
