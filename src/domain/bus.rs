// src/domain/bus.rs

//! Message-bus domain abstractions.
//!
//! This module defines the minimal publish/subscribe contract that the
//! connection-oriented layer is built on. It intentionally avoids any
//! reference to concrete brokers or client libraries.
//!
//! The bus is responsible only for delivering opaque envelopes to the
//! subscribers of an exact address. Connection semantics (peers, sockets,
//! termination) are synthesized one layer up, in `crate::transport`.
//!
//! Concrete implementations of this interface live under `src/bus/`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{Result, TlsConfig, TransportError};

/// Prefix of bus-generated private inbox addresses.
pub const INBOX_PREFIX: &str = "_INBOX.";

/// A bus address.
///
/// An `Address` is a destination to which envelopes may be published. Its
/// interpretation is bus-specific (a pub/sub channel, a subject, a topic) but
/// it is an opaque, exactly-matched identifier at this level.
///
/// Addresses are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription target.
///
/// Matching is exact string equality with a published [`Address`]; no
/// wildcard syntax is defined at this level.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl From<&Address> for Subscription {
    fn from(address: &Address) -> Self {
        // ---
        Subscription(address.0.clone())
    }
}

impl From<&str> for Subscription {
    fn from(value: &str) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// Generate a unique private inbox address.
pub fn new_inbox() -> Address {
    // ---
    Address::from(format!("{INBOX_PREFIX}{}", Uuid::new_v4().simple()))
}

/// An addressed bus message.
///
/// Carries an opaque payload plus the optional reply address the receiver
/// should answer to. The bus does not interpret either.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    // ---
    /// Delivery address.
    pub address: Address,

    /// Address the sender listens on for answers, if any.
    pub reply_to: Option<Address>,

    /// Opaque payload bytes (an encoded [`Message`](crate::Message)).
    pub payload: Bytes,
}

impl Envelope {
    // ---
    /// Create a fire-and-forget envelope.
    pub fn new(address: Address, payload: Bytes) -> Self {
        Self {
            address,
            reply_to: None,
            payload,
        }
    }

    /// Create an envelope that names a reply address.
    pub fn with_reply(address: Address, reply_to: Address, payload: Bytes) -> Self {
        Self {
            address,
            reply_to: Some(reply_to),
            payload,
        }
    }
}

/// Handle returned from a successful subscription.
///
/// Envelopes are queued on `inbox` until read. The subscription stays
/// registered until it is handed back to [`Bus::unsubscribe`] or the bus
/// connection is closed; dropping the handle makes the bus discard further
/// deliveries lazily.
pub struct SubscriptionHandle {
    // ---
    /// The subscribed address.
    pub subscription: Subscription,

    /// Bus-local identifier, unique per connection.
    pub id: u64,

    /// Receiver channel for delivered envelopes.
    pub inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl SubscriptionHandle {
    /// Wait for the next envelope, at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if nothing arrived in time.
    /// - [`TransportError::Closed`] if the bus connection dropped the
    ///   subscription.
    pub async fn next_msg(&mut self, timeout: Duration) -> Result<Envelope> {
        // ---
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(env)) => Ok(env),
            Ok(None) => Err(TransportError::Closed),
            Err(_elapsed) => Err(TransportError::Timeout),
        }
    }
}

/// Settings a [`BusConnector`] needs to open one bus session.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Normalized server URLs, tried in order.
    pub servers: Vec<String>,
    /// Require an encrypted connection.
    pub secure: bool,
    /// TLS settings; when present `secure` is also set.
    pub tls: Option<TlsConfig>,
    /// Upper bound on establishing the connection.
    pub timeout: Duration,
}

/// Message-bus client abstraction.
///
/// One `Bus` value is one connection/session with the broker. Implementations
/// must ensure that:
/// - once `subscribe()` returns, envelopes published afterwards to the same
///   address are deliverable to the returned handle;
/// - `publish()` does not wait for subscribers to consume;
/// - `close()` is idempotent and drops every subscription owned by this
///   connection, and only those.
///
/// The in-memory bus is the reference implementation of these semantics.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    // ---
    /// Identifier of this connection, used in logs.
    fn bus_id(&self) -> &str;

    /// Generate a unique address suitable as a private reply inbox.
    fn new_inbox(&self) -> Address {
        new_inbox()
    }

    /// Publish an envelope to its address.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving envelopes.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Remove a subscription previously returned by [`Bus::subscribe`].
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;

    /// Disconnect and release every subscription owned by this connection.
    async fn close(&self) -> Result<()>;
}

/// Shared bus pointer.
pub type BusPtr = Arc<dyn Bus>;

/// Opens bus connections.
///
/// The transport factory opens one connection per dialed client and one per
/// listener, exactly as it would against a networked broker.
#[async_trait::async_trait]
pub trait BusConnector: Send + Sync {
    // ---
    /// URL scheme, used for address normalization (e.g. `"redis"`).
    fn scheme(&self) -> &'static str;

    /// URL used when no server address is configured.
    fn default_url(&self) -> &'static str;

    /// Open a new connection.
    async fn connect(&self, opts: &ConnectOptions) -> Result<BusPtr>;
}

/// Shared connector pointer.
pub type BusConnectorPtr = Arc<dyn BusConnector>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_new_inbox_unique() {
        // ---
        let a = new_inbox();
        let b = new_inbox();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(INBOX_PREFIX));
    }

    #[tokio::test]
    async fn test_next_msg_timeout_and_closed() {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = SubscriptionHandle {
            subscription: Subscription::from("a"),
            id: 1,
            inbox: rx,
        };

        let err = handle.next_msg(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);

        tx.send(Envelope::new(Address::from("a"), Bytes::from_static(b"x")))
            .unwrap();
        let env = handle.next_msg(Duration::from_millis(10)).await.unwrap();
        assert_eq!(env.payload, Bytes::from_static(b"x"));

        drop(tx);
        let err = handle.next_msg(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
