//! Connection-oriented sockets over publish/subscribe message buses.
//!
//! A pub/sub bus only knows how to deliver an addressed payload, optionally
//! tagged with a reply address. This crate builds dial, listen, accept,
//! send, receive and close on top of that:
//!
//! - a listener binds one rendezvous address and demultiplexes it, by each
//!   sender's reply address, into independent virtual sockets;
//! - each socket buffers per peer, so a slow handler never stalls the others;
//! - a dialed client owns a private inbox and announces its shutdown with a
//!   termination marker.
//!
//! ```
//! use std::sync::Arc;
//! use mom_transport::{DialOptions, ListenOptions, MemoryHub, Message, SocketPtr, TransportBuilder};
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> mom_transport::Result<()> {
//! let transport = TransportBuilder::new().memory_hub(MemoryHub::new()).build()?;
//!
//! let listener = transport.listen("", ListenOptions::default()).await?;
//! let accept = {
//!     let listener = listener.clone();
//!     tokio::spawn(async move {
//!         listener
//!             .accept(Arc::new(|sock: SocketPtr| async move {
//!                 let msg = sock.recv().await?;
//!                 sock.send(&msg).await
//!             }))
//!             .await
//!     })
//! };
//!
//! let client = transport.dial(listener.addr().as_str(), DialOptions::default()).await?;
//! client.send(&Message::from_body("ping")).await?;
//! assert_eq!(client.recv().await?.body, "ping".as_bytes());
//!
//! client.close().await?;
//! listener.close().await?;
//! accept.await.expect("accept task panicked")?;
//! # Ok(())
//! # }
//! ```

mod bus;
mod codec;
mod domain;
mod error;
mod macros;
mod message;
mod transport;
mod transport_builder;
mod transport_config;

pub(crate) use macros::{log_debug, log_error, log_info, log_trace, log_warn};

pub use codec::{default_codec, Codec, CodecPtr, JsonCodec};
pub use error::{Result, TransportError};
pub use message::{Message, CLOSE_HEADER};

pub use transport::{BusClient, BusListener, BusSocket, BusTransport, MultiTransport};
pub use transport_builder::TransportBuilder;
pub use transport_config::{
    //
    TlsConfig,
    TransportConfig,
    DEFAULT_DIAL_TIMEOUT,
    DEFAULT_POLL_INTERVAL,
    DEFAULT_RECV_TIMEOUT,
};

pub use bus::{redis_connector, MemoryBus, MemoryConnector, MemoryHub, MEMORY_DEFAULT_URL, MEMORY_SCHEME};

#[cfg(feature = "bus_redis")]
pub use bus::{RedisBus, RedisConnector, REDIS_DEFAULT_URL, REDIS_SCHEME};

// --- public re-exports
pub use domain::{
    //
    new_inbox,
    Address,
    BoxFuture,
    Bus,
    BusConnector,
    BusConnectorPtr,
    BusPtr,
    ClientPtr,
    ConnectOptions,
    DialOptions,
    Envelope,
    HandlerPtr,
    ListenOptions,
    Listener,
    ListenerPtr,
    Socket,
    SocketHandler,
    SocketPtr,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
    INBOX_PREFIX,
};
