//! Transport factory over a message bus.

use std::sync::Arc;

use crate::{
    // ---
    log_debug,
    log_error,
    Address,
    BusConnectorPtr,
    BusPtr,
    ClientPtr,
    CodecPtr,
    DialOptions,
    ListenOptions,
    ListenerPtr,
    Result,
    Transport,
    TransportConfig,
    TransportError,
};

use super::{BusClient, BusListener};

/// Connection-oriented transport built on a publish/subscribe bus.
///
/// Every `dial()` and every `listen()` opens its own bus connection through
/// the configured [`BusConnector`](crate::BusConnector), so closing one
/// client never disturbs another.
pub struct BusTransport {
    // ---
    connector: BusConnectorPtr,
    config: TransportConfig,
    codec: CodecPtr,
}

impl BusTransport {
    // ---
    /// Create a transport from its parts. Most callers use
    /// [`TransportBuilder`](crate::TransportBuilder) instead.
    pub fn new(connector: BusConnectorPtr, config: TransportConfig, codec: CodecPtr) -> Self {
        Self {
            connector,
            config,
            codec,
        }
    }

    async fn connect(&self, timeout: std::time::Duration) -> Result<BusPtr> {
        // ---
        let opts = self.config.connect_options(
            self.connector.scheme(),
            self.connector.default_url(),
            timeout,
        );

        match tokio::time::timeout(timeout, self.connector.connect(&opts)).await {
            Ok(Ok(bus)) => Ok(bus),
            Ok(Err(err)) => {
                log_error!("{}: connect to {:?} failed: {err}", self.name(), opts.servers);
                Err(err)
            }
            Err(_elapsed) => {
                log_error!("{}: connect to {:?} timed out", self.name(), opts.servers);
                Err(TransportError::Timeout)
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for BusTransport {
    // ---

    /// Connect to the bus, allocate a private inbox, and subscribe to it.
    ///
    /// Fails closed: on any error no client is returned and the bus
    /// connection is released.
    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<ClientPtr> {
        // ---
        if addr.is_empty() {
            return Err(TransportError::MissingConfig("dial address".into()));
        }

        let timeout = opts.timeout.unwrap_or(self.config.dial_timeout);
        let bus = self.connect(timeout).await?;

        let client = BusClient::connect(
            bus,
            Address::from(addr),
            self.codec.clone(),
            self.config.recv_timeout,
        )
        .await?;

        Ok(Arc::new(client))
    }

    /// Connect to the bus and bind `addr`.
    ///
    /// An empty `addr` binds a freshly generated unique inbox; read it back
    /// with [`Listener::addr`](crate::Listener::addr).
    async fn listen(&self, addr: &str, _opts: ListenOptions) -> Result<ListenerPtr> {
        // ---
        let bus = self.connect(self.config.dial_timeout).await?;

        let addr = if addr.is_empty() {
            bus.new_inbox()
        } else {
            Address::from(addr)
        };

        log_debug!("{}: listening on {addr} ({} codec)", bus.bus_id(), self.codec.name());

        Ok(Arc::new(BusListener::new(
            bus,
            addr,
            self.codec.clone(),
            self.config.poll_interval,
        )))
    }

    fn name(&self) -> &'static str {
        self.connector.scheme()
    }
}
