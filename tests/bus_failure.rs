mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use common::{echo_handler, init_logging, memory_transport, spawn_accept, WAIT};
use mom_transport::{
    // ---
    BusConnector,
    BusPtr,
    ConnectOptions,
    DialOptions,
    ListenOptions,
    MemoryConnector,
    MemoryHub,
    Message,
    MultiTransport,
    Result,
    TransportBuilder,
    Transport,
    TransportError,
};

/// Connector that always fails to reach its bus.
struct Unreachable;

#[async_trait::async_trait]
impl BusConnector for Unreachable {
    fn scheme(&self) -> &'static str {
        "unreachable"
    }

    fn default_url(&self) -> &'static str {
        "unreachable://nowhere"
    }

    async fn connect(&self, _opts: &ConnectOptions) -> Result<BusPtr> {
        Err(TransportError::Bus("connection refused".into()))
    }
}

/// Memory connector that keeps a handle on every bus it opens.
struct Recording {
    inner: MemoryConnector,
    opened: Mutex<Vec<BusPtr>>,
}

#[async_trait::async_trait]
impl BusConnector for Recording {
    fn scheme(&self) -> &'static str {
        self.inner.scheme()
    }

    fn default_url(&self) -> &'static str {
        self.inner.default_url()
    }

    async fn connect(&self, opts: &ConnectOptions) -> Result<BusPtr> {
        let bus = self.inner.connect(opts).await?;
        self.opened.lock().unwrap().push(bus.clone());
        Ok(bus)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bus_failure_ends_accept() -> Result<()> {
    // ---
    init_logging();

    let recording = Arc::new(Recording {
        inner: MemoryConnector::new(MemoryHub::new()),
        opened: Mutex::new(Vec::new()),
    });
    let transport = TransportBuilder::new()
        .connector(recording.clone())
        .poll_interval(Duration::from_secs(30))
        .build()?;

    let listener = transport.listen("svc", ListenOptions::default()).await?;
    let accept = spawn_accept(listener.clone(), echo_handler());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // drop the listener's connection out from under it
    let bus = recording.opened.lock().unwrap()[0].clone();
    bus.close().await?;

    let result = timeout(WAIT, accept)
        .await
        .expect("accept did not notice the bus going away")
        .expect("accept task panicked");
    assert_eq!(result, Err(TransportError::Closed));

    listener.close().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dial_unreachable_bus() {
    // ---
    let transport = TransportBuilder::new()
        .connector(Arc::new(Unreachable))
        .build()
        .unwrap();

    let err = transport.dial("svc", DialOptions::default()).await.err().unwrap();
    assert_eq!(err, TransportError::Bus("connection refused".into()));

    let err = transport.listen("svc", ListenOptions::default()).await.err().unwrap();
    assert_eq!(err, TransportError::Bus("connection refused".into()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multi_falls_back_to_next_transport() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    let working = memory_transport(hub.clone());
    let broken = TransportBuilder::new().connector(Arc::new(Unreachable)).build()?;

    let multi = MultiTransport::new()
        .with_transports([broken, working.clone()])
        .with_listen_transport(working);
    assert_eq!(multi.transport_count(), 2);

    let listener = multi.listen("", ListenOptions::default()).await?;
    let accept = spawn_accept(listener.clone(), echo_handler());

    let client = multi
        .dial(listener.addr().as_str(), DialOptions::with_timeout(WAIT))
        .await?;
    client.send(&Message::from_body("via fallback")).await?;
    assert_eq!(client.recv().await?.body, "via fallback".as_bytes());

    client.close().await?;
    listener.close().await?;
    accept.await.expect("accept task panicked")?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multi_reports_last_error() {
    // ---
    let broken = TransportBuilder::new()
        .connector(Arc::new(Unreachable))
        .build()
        .unwrap();
    let multi = MultiTransport::new().with_transports([broken]);

    let err = multi.dial("svc", DialOptions::default()).await.err().unwrap();
    assert_eq!(err, TransportError::Bus("connection refused".into()));

    let err = multi.listen("svc", ListenOptions::default()).await.err().unwrap();
    assert!(matches!(err, TransportError::NotSupported(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multi_without_transports() {
    // ---
    let multi = MultiTransport::new();
    assert_eq!(multi.name(), "multi");

    let err = multi.dial("svc", DialOptions::default()).await.err().unwrap();
    assert!(matches!(err, TransportError::NotSupported(_)));
}
