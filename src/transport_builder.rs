//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing a [`BusTransport`] with
//! clear separation between bus selection and connection settings.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    // ---
    default_codec,
    redis_connector,
    BusConnectorPtr,
    BusTransport,
    CodecPtr,
    MemoryConnector,
    MemoryHub,
    Result,
    TlsConfig,
    TransportConfig,
    TransportError,
    TransportPtr,
};

/// Builder for creating transport instances.
///
/// # Examples
///
/// ## In-memory bus with an isolated hub
/// ```
/// use mom_transport::{MemoryHub, TransportBuilder};
/// use std::time::Duration;
///
/// let transport = TransportBuilder::new()
///     .memory_hub(MemoryHub::new())
///     .recv_timeout(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(transport.name(), "memory");
/// ```
///
/// ## Redis bus
/// ```no_run
/// use mom_transport::TransportBuilder;
///
/// # fn example() -> mom_transport::Result<()> {
/// let transport = TransportBuilder::new()
///     .bus_type("redis")
///     .addrs(["10.0.0.1:6379", "10.0.0.2:6379"])
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TransportBuilder {
    addrs: Vec<String>,
    secure: bool,
    tls: Option<TlsConfig>,
    codec: Option<CodecPtr>,
    dial_timeout: Option<Duration>,
    recv_timeout: Option<Duration>,
    poll_interval: Option<Duration>,

    // bus selection; at most one of these may be set
    bus_type: Option<String>,
    memory_hub: Option<Arc<MemoryHub>>,
    connector: Option<BusConnectorPtr>,
}

impl TransportBuilder {
    /// Create a new transport builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one bus server address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }

    /// Add several bus server addresses, tried in order.
    pub fn addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs.extend(addrs.into_iter().map(Into::into));
        self
    }

    /// Require an encrypted bus connection.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Supply TLS settings. Implies [`secure(true)`](Self::secure).
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Wire codec; defaults to [`JsonCodec`](crate::JsonCodec).
    pub fn codec(mut self, codec: CodecPtr) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Default dial timeout (5s unless set).
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Client receive timeout (10s unless set).
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Listener idle poll interval (60s unless set).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Select a bus by name.
    ///
    /// Valid values: `"memory"`, `"redis"`. `"redis"` requires the
    /// `bus_redis` feature.
    pub fn bus_type(mut self, name: impl Into<String>) -> Self {
        self.bus_type = Some(name.into());
        self
    }

    /// Use the in-memory bus on an explicit hub.
    pub fn memory_hub(mut self, hub: Arc<MemoryHub>) -> Self {
        self.memory_hub = Some(hub);
        self
    }

    /// Use a custom bus connector.
    pub fn connector(mut self, connector: BusConnectorPtr) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the transport (consumes self). No connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - more than one of `bus_type`, `memory_hub`, `connector` selects a bus
    ///   (a `memory_hub` together with `bus_type("memory")` is allowed)
    /// - `bus_type` names an unknown or disabled bus
    /// - a timeout or poll interval is zero
    pub fn build(self) -> Result<TransportPtr> {
        // ---
        let connector = self.select_connector()?;

        let mut config = TransportConfig {
            addrs: self.addrs,
            secure: self.secure,
            tls: self.tls,
            ..TransportConfig::default()
        };

        for (name, value, slot) in [
            ("dial_timeout", self.dial_timeout, &mut config.dial_timeout),
            ("recv_timeout", self.recv_timeout, &mut config.recv_timeout),
            ("poll_interval", self.poll_interval, &mut config.poll_interval),
        ] {
            match value {
                Some(d) if d.is_zero() => {
                    return Err(TransportError::ConfigConflict(format!("{name} must be non-zero")));
                }
                Some(d) => *slot = d,
                None => {}
            }
        }

        let codec = self.codec.unwrap_or_else(default_codec);

        Ok(Arc::new(BusTransport::new(connector, config, codec)))
    }

    fn select_connector(&self) -> Result<BusConnectorPtr> {
        // ---
        let bus_type = self.bus_type.as_deref();

        match (bus_type, &self.memory_hub, &self.connector) {
            (None, None, Some(connector)) => Ok(connector.clone()),
            (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => Err(TransportError::ConfigConflict(
                "a custom connector cannot be combined with bus_type or memory_hub".into(),
            )),
            (None | Some("memory"), Some(hub), None) => Ok(Arc::new(MemoryConnector::new(hub.clone()))),
            (Some(other), Some(_), None) => Err(TransportError::ConfigConflict(format!(
                "memory_hub cannot be used with bus_type {other}"
            ))),
            (None | Some("memory"), None, None) => Ok(Arc::new(MemoryConnector::global())),
            (Some("redis"), None, None) => redis_connector(),
            (Some(other), None, None) => Err(TransportError::NotSupported(format!(
                "unrecognized bus_type: {other}, valid values: memory, redis"
            ))),
        }
    }
}
