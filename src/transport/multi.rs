//! Fallback composition of several transports.

use crate::{
    // ---
    log_debug,
    ClientPtr,
    DialOptions,
    ListenOptions,
    ListenerPtr,
    Result,
    Transport,
    TransportError,
    TransportPtr,
};

/// Tries a list of transports in order when dialing, and listens on an
/// optional designated transport.
///
/// ```
/// # use mom_transport::{MemoryHub, MultiTransport, TransportBuilder};
/// let primary = TransportBuilder::new().memory_hub(MemoryHub::new()).build().unwrap();
/// let multi = MultiTransport::new()
///     .with_transports([primary.clone()])
///     .with_listen_transport(primary);
/// assert_eq!(multi.transport_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MultiTransport {
    // ---
    transports: Vec<TransportPtr>,
    listen: Option<TransportPtr>,
}

impl MultiTransport {
    // ---
    /// An empty multi transport; dialing fails until transports are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transports to the dial order.
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = TransportPtr>) -> Self {
        self.transports.extend(transports);
        self
    }

    /// Set the transport `listen()` delegates to.
    pub fn with_listen_transport(mut self, transport: TransportPtr) -> Self {
        self.listen = Some(transport);
        self
    }

    /// Number of transports in the dial order.
    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }
}

#[async_trait::async_trait]
impl Transport for MultiTransport {
    // ---

    /// Returns the first successful dial, or the last error.
    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<ClientPtr> {
        // ---
        let mut last_err = TransportError::NotSupported("no transports provided".into());

        for transport in &self.transports {
            match transport.dial(addr, opts.clone()).await {
                Ok(client) => return Ok(client),
                Err(err) => {
                    log_debug!("multi: dial via {} failed: {err}", transport.name());
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    async fn listen(&self, addr: &str, opts: ListenOptions) -> Result<ListenerPtr> {
        // ---
        match &self.listen {
            Some(transport) => transport.listen(addr, opts).await,
            None => Err(TransportError::NotSupported(
                "multi transport has no listen transport".into(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "multi"
    }
}
