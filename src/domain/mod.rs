//! Domain layer public interface.
//!
//! This module defines the abstractions the rest of the crate is written
//! against: the pub/sub bus contract underneath, and the connection
//! contract on top. Neither refers to a concrete broker.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod bus;
mod transport;

// --- Bus domain re-exports ---

pub use bus::{
    //
    new_inbox,
    Address,
    Bus,
    BusConnector,
    BusConnectorPtr,
    BusPtr,
    ConnectOptions,
    Envelope,
    Subscription,
    SubscriptionHandle,
    INBOX_PREFIX,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    BoxFuture,
    ClientPtr,
    DialOptions,
    HandlerPtr,
    ListenOptions,
    Listener,
    ListenerPtr,
    Socket,
    SocketHandler,
    SocketPtr,
    Transport,
    TransportPtr,
};
