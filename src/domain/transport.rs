// src/domain/transport.rs

//! Connection-oriented transport contract.
//!
//! These traits describe the dial/listen/accept/send/recv/close surface
//! that every transport backend exposes, whatever substrate it runs on. The
//! bus-backed implementation lives in `crate::transport`; `MultiTransport`
//! composes several backends behind the same contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::{Address, Message, Result};

/// Boxed future returned by type-erased handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One end of a virtual connection.
///
/// Implemented by the server-side socket handed to accept handlers and by
/// the client returned from [`Transport::dial`]. All methods take `&self` so
/// a socket can be shared between a reading and a writing task.
#[async_trait::async_trait]
pub trait Socket: Send + Sync {
    // ---
    /// Receive the next message from the peer.
    async fn recv(&self) -> Result<Message>;

    /// Send a message to the peer.
    async fn send(&self, msg: &Message) -> Result<()>;

    /// Close this end. Repeated calls are no-ops.
    async fn close(&self) -> Result<()>;

    /// Address this end receives on.
    fn local_addr(&self) -> &Address;

    /// Address the peer receives on.
    fn remote_addr(&self) -> &Address;
}

/// Shared socket pointer handed to accept handlers.
pub type SocketPtr = Arc<dyn Socket>;

/// Shared pointer to a dialed client connection.
pub type ClientPtr = Arc<dyn Socket>;

/// Per-connection handler invoked by [`Listener::accept`].
///
/// Each newly observed peer gets its own invocation on its own task.
/// Returning an error, or panicking, closes the socket.
pub trait SocketHandler: Send + Sync + 'static {
    fn handle(&self, socket: SocketPtr) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> SocketHandler for F
where
    F: Fn(SocketPtr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, socket: SocketPtr) -> BoxFuture<'static, Result<()>> {
        Box::pin((self)(socket))
    }
}

/// Shared handler pointer.
pub type HandlerPtr = Arc<dyn SocketHandler>;

/// A bound rendezvous point that accepts virtual connections.
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    // ---
    /// The bound address peers dial.
    fn addr(&self) -> &Address;

    /// Run the accept loop until the listener is closed or the bus fails.
    async fn accept(&self, handler: HandlerPtr) -> Result<()>;

    /// Stop accepting. Repeated calls are no-ops.
    async fn close(&self) -> Result<()>;
}

/// Shared listener pointer.
pub type ListenerPtr = Arc<dyn Listener>;

/// Per-call dial settings.
#[derive(Clone, Debug, Default)]
pub struct DialOptions {
    /// Connection timeout; falls back to the transport's configured value.
    pub timeout: Option<Duration>,
}

impl DialOptions {
    /// Dial options with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Per-call listen settings. Currently carries nothing.
#[derive(Clone, Debug, Default)]
pub struct ListenOptions {}

/// A connection-oriented transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Open a client connection to a listener bound at `addr`.
    async fn dial(&self, addr: &str, opts: DialOptions) -> Result<ClientPtr>;

    /// Bind a listener at `addr`.
    async fn listen(&self, addr: &str, opts: ListenOptions) -> Result<ListenerPtr>;

    /// Backend name, e.g. `"redis"` or `"multi"`.
    fn name(&self) -> &'static str;
}

/// Shared transport pointer.
pub type TransportPtr = Arc<dyn Transport>;
