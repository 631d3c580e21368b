//! In-memory bus implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Bus` trait. It is intended primarily for testing, local execution, and as
//! the reference for bus semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns successfully, envelopes published *after*
//!   that point to the same address are deliverable.
//! - Matching is exact string equality between subscription and address.
//! - Publishing never waits for a subscriber to consume; inboxes are
//!   unbounded.
//! - A connection's `close()` drops its own subscriptions and no others.
//!
//! ## Non-Goals
//!
//! This bus does not emulate the failure modes, persistence, or delivery
//! guarantees of any specific broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, RwLock};

use crate::{
    // ---
    log_debug,
    log_trace,
    Bus,
    BusConnector,
    BusPtr,
    ConnectOptions,
    Envelope,
    Result,
    Subscription,
    SubscriptionHandle,
    TransportError,
};

/// URL scheme of the in-memory bus.
pub const MEMORY_SCHEME: &str = "memory";

/// Server URL reported when none is configured.
pub const MEMORY_DEFAULT_URL: &str = "memory://local";

struct Subscriber {
    conn_id: u64,
    sub_id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Shared message bus for the in-memory backend.
///
/// Simulates a broker within a single process. All [`MemoryBus`] connections
/// opened against the same hub publish to and receive from each other,
/// exactly as clients connected to one real broker would.
///
/// Integration tests construct one hub per test for isolation:
///
/// ```
/// # use mom_transport::{MemoryHub, TransportBuilder};
/// let hub = MemoryHub::new();
/// let transport = TransportBuilder::new().memory_hub(hub.clone()).build().unwrap();
/// assert_eq!(transport.name(), "memory");
/// ```
pub struct MemoryHub {
    // ---
    subscriptions: RwLock<HashMap<Subscription, Vec<Subscriber>>>,
    next_conn_id: AtomicU64,
    next_sub_id: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    /// Number of live subscriptions across all connections.
    pub async fn subscription_count(&self) -> usize {
        // ---
        let subs = self.subscriptions.read().await;
        subs.values().map(Vec::len).sum()
    }

    async fn publish(&self, bus_id: &str, env: Envelope) -> Result<()> {
        // ---
        let subs = self.subscriptions.read().await;

        let Some(subscribers) = subs.get(&Subscription::from(&env.address)) else {
            log_trace!("{bus_id}: no subscribers for {}", env.address);
            return Ok(());
        };

        for sub in subscribers {
            // A closed channel indicates a dropped SubscriptionHandle.
            if sub.tx.send(env.clone()).is_err() {
                log_trace!("{bus_id}: dropped envelope for stale subscription {}", sub.sub_id);
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        bus_id: &str,
        conn_id: u64,
        sub: Subscription,
    ) -> Result<SubscriptionHandle> {
        // ---
        log_debug!("{bus_id}: subscribe to {}", sub.0);

        let (tx, rx) = mpsc::unbounded_channel();
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);

        let mut subs = self.subscriptions.write().await;
        subs.entry(sub.clone()).or_default().push(Subscriber {
            conn_id,
            sub_id,
            tx,
        });

        Ok(SubscriptionHandle {
            subscription: sub,
            id: sub_id,
            inbox: rx,
        })
    }

    async fn unsubscribe(&self, bus_id: &str, handle: SubscriptionHandle) -> Result<()> {
        // ---
        log_debug!("{bus_id}: unsubscribe from {}", handle.subscription.0);

        let mut subs = self.subscriptions.write().await;
        if let Some(list) = subs.get_mut(&handle.subscription) {
            list.retain(|s| s.sub_id != handle.id);
            if list.is_empty() {
                subs.remove(&handle.subscription);
            }
        }
        Ok(())
    }

    async fn close_connection(&self, bus_id: &str, conn_id: u64) {
        // ---
        log_debug!("{bus_id}: closing connection...");

        let mut subs = self.subscriptions.write().await;
        subs.retain(|_, list| {
            list.retain(|s| s.conn_id != conn_id);
            !list.is_empty()
        });
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            next_sub_id: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used when no hub is configured.
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// One connection to a [`MemoryHub`].
pub struct MemoryBus {
    // ---
    bus_id: String,
    conn_id: u64,
    hub: Arc<MemoryHub>,
    closed: AtomicBool,
}

impl MemoryBus {
    /// Open a new connection to `hub`.
    pub fn connect(hub: Arc<MemoryHub>) -> Self {
        // ---
        let conn_id = hub.next_conn_id.fetch_add(1, Ordering::Relaxed);
        Self {
            bus_id: format!("memory-{conn_id}"),
            conn_id,
            hub,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Bus for MemoryBus {
    // ---
    fn bus_id(&self) -> &str {
        &self.bus_id
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.ensure_open()?;
        self.hub.publish(&self.bus_id, env).await
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        self.hub.subscribe(&self.bus_id, self.conn_id, sub).await
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        // closing the connection already removed it
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.hub.unsubscribe(&self.bus_id, handle).await
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.hub.close_connection(&self.bus_id, self.conn_id).await;
        }
        Ok(())
    }
}

/// Opens [`MemoryBus`] connections against one hub.
#[derive(Clone)]
pub struct MemoryConnector {
    hub: Arc<MemoryHub>,
}

impl MemoryConnector {
    /// Connector for an explicit hub.
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self { hub }
    }

    /// Connector for the process-global hub.
    pub fn global() -> Self {
        Self { hub: global_hub() }
    }
}

#[async_trait::async_trait]
impl BusConnector for MemoryConnector {
    // ---
    fn scheme(&self) -> &'static str {
        MEMORY_SCHEME
    }

    fn default_url(&self) -> &'static str {
        MEMORY_DEFAULT_URL
    }

    async fn connect(&self, _opts: &ConnectOptions) -> Result<BusPtr> {
        // ---
        let bus = MemoryBus::connect(self.hub.clone());
        log_debug!("{}: connected to in-memory hub", bus.bus_id);
        Ok(Arc::new(bus))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Address;
    use bytes::Bytes;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_close_drops_only_own_subscriptions() {
        // ---
        let hub = MemoryHub::new();
        let a = MemoryBus::connect(hub.clone());
        let b = MemoryBus::connect(hub.clone());

        let _ha = a.subscribe(Subscription::from("topic")).await.unwrap();
        let mut hb = b.subscribe(Subscription::from("topic")).await.unwrap();
        assert_eq!(hub.subscription_count().await, 2);

        a.close().await.unwrap();
        a.close().await.unwrap();
        assert_eq!(hub.subscription_count().await, 1);

        b.publish(Envelope::new(Address::from("topic"), Bytes::from_static(b"hi")))
            .await
            .unwrap();
        let env = hb.next_msg(WAIT).await.unwrap();
        assert_eq!(env.payload, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_publish() {
        // ---
        let bus = MemoryBus::connect(MemoryHub::new());
        bus.close().await.unwrap();

        let err = bus
            .publish(Envelope::new(Address::from("x"), Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        // ---
        let hub = MemoryHub::new();
        let bus = MemoryBus::connect(hub.clone());

        let handle = bus.subscribe(Subscription::from("t")).await.unwrap();
        bus.unsubscribe(handle).await.unwrap();
        assert_eq!(hub.subscription_count().await, 0);
    }
}
