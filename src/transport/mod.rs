//! Connection-oriented transport over a message bus.
//!
//! [`BusTransport`] synthesizes dial/listen/accept/send/recv/close on top of
//! a [`Bus`](crate::Bus) that only knows addressed, fire-and-forget
//! envelopes with an optional reply address:
//!
//! - a dialed [`BusClient`] publishes to the listener's rendezvous address,
//!   naming its private inbox as the reply address;
//! - a [`BusListener`] demultiplexes the rendezvous stream by reply address
//!   into per-peer [`BusSocket`]s;
//! - a socket answers by publishing straight to the peer's inbox.

mod bus_transport;
mod client;
mod listener;
mod multi;
mod socket;

pub use bus_transport::BusTransport;
pub use client::BusClient;
pub use listener::BusListener;
pub use multi::MultiTransport;
pub use socket::BusSocket;

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn read_ignore_poison<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match l.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write_ignore_poison<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match l.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Resolve once a one-shot `bool` signal has fired (or its sender is gone).
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    // ---
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
