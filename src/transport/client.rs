//! Client side of a virtual connection.
//!
//! A dialed [`BusClient`] owns its own bus connection and a private reply
//! inbox. Every message it sends names that inbox as the reply address,
//! which is how the listener tells this client apart from every other peer
//! on the same rendezvous address.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use crate::{
    // ---
    log_debug,
    log_warn,
    Address,
    BusPtr,
    CodecPtr,
    Envelope,
    Message,
    Result,
    Socket,
    Subscription,
    SubscriptionHandle,
    TransportError,
};

/// Connection from a dialing client to one listener.
pub struct BusClient {
    // ---
    bus: BusPtr,
    codec: CodecPtr,
    target: Address,
    reply: Address,
    recv_timeout: Duration,

    sub: Mutex<Option<SubscriptionHandle>>,
    closed: AtomicBool,
}

impl BusClient {
    // ---
    /// Allocate a private inbox on `bus` and subscribe to it.
    ///
    /// On failure the bus connection is closed; no client is returned.
    pub(crate) async fn connect(
        bus: BusPtr,
        target: Address,
        codec: CodecPtr,
        recv_timeout: Duration,
    ) -> Result<Self> {
        // ---
        let reply = bus.new_inbox();

        let sub = match bus.subscribe(Subscription::from(&reply)).await {
            Ok(sub) => sub,
            Err(err) => {
                let _ = bus.close().await;
                return Err(err);
            }
        };

        log_debug!("{}: dialed {target}, replies on {reply}", bus.bus_id());

        Ok(Self {
            bus,
            codec,
            target,
            reply,
            recv_timeout,
            sub: Mutex::new(Some(sub)),
            closed: AtomicBool::new(false),
        })
    }

    /// True once `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn publish(&self, msg: &Message) -> Result<()> {
        // ---
        let payload = self.codec.encode(msg)?;
        let env = Envelope::with_reply(self.target.clone(), self.reply.clone(), payload);
        self.bus.publish(env).await
    }
}

#[async_trait::async_trait]
impl Socket for BusClient {
    // ---

    /// Wait up to the configured receive timeout for the next reply.
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if nothing arrived in time;
    /// [`TransportError::Closed`] once the client is closed.
    async fn recv(&self) -> Result<Message> {
        // ---
        self.ensure_open()?;

        let mut guard = self.sub.lock().await;
        let Some(sub) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };

        let env = sub.next_msg(self.recv_timeout).await?;
        self.codec.decode(&env.payload)
    }

    async fn send(&self, msg: &Message) -> Result<()> {
        // ---
        self.ensure_open()?;
        self.publish(msg).await
    }

    /// Send the termination marker, then unsubscribe and disconnect.
    ///
    /// Teardown happens even if the marker could not be published; that
    /// error is returned afterwards. Only the first call has an effect.
    async fn close(&self) -> Result<()> {
        // ---
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let marker = self.publish(&Message::close_marker()).await;
        if let Err(_err) = &marker {
            log_warn!("{}: failed to send close marker to {}: {_err}", self.bus.bus_id(), self.target);
        }

        // a recv in flight holds the lock; closing the bus below ends it
        if let Ok(mut guard) = self.sub.try_lock() {
            if let Some(sub) = guard.take() {
                let _ = self.bus.unsubscribe(sub).await;
            }
        }

        self.bus.close().await?;
        log_debug!("{}: closed connection to {}", self.bus.bus_id(), self.target);

        marker
    }

    fn local_addr(&self) -> &Address {
        &self.reply
    }

    fn remote_addr(&self) -> &Address {
        &self.target
    }
}
