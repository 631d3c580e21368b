//! Rendezvous listener and demultiplexing loop.
//!
//! A [`BusListener`] subscribes to one rendezvous address. Every envelope
//! arriving there names the sender's private reply address; the listener
//! keys a table of [`BusSocket`]s by that address, creating a socket (and a
//! handler task) the first time a peer is seen and routing later envelopes
//! from the same peer into its socket.
//!
//! ## Tasks per peer
//!
//! - **worker**: runs the accept handler with the peer's socket.
//! - **supervisor**: awaits the worker. When the handler returns, fails, or
//!   panics, the socket is closed. A panic never reaches the dispatch loop.
//! - **reaper**: awaits the socket's close signal and removes the socket
//!   from the table, unless the entry has already been replaced by a newer
//!   connection from the same reply address.
//!
//! ## Reused peer addresses
//!
//! An envelope whose reply address maps to a socket that is already closed
//! (but not yet reaped) opens a fresh connection. A lone termination marker
//! from a peer with no live socket is discarded, since there is nothing to
//! terminate.
//!
//! ## Shutdown
//!
//! `close()` sets the closed flag, then snapshots the table under its write
//! lock and closes every socket in it. `dispatch` checks the flag under
//! that same lock before inserting, so no socket can slip in behind the
//! sweep. The accept loop sweeps once more on its way out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use super::{read_ignore_poison, signalled, write_ignore_poison, BusSocket};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    BusPtr,
    CodecPtr,
    Envelope,
    HandlerPtr,
    Listener,
    Result,
    Socket,
    SocketPtr,
    Subscription,
    TransportError,
};

/// Live sockets keyed by peer reply address.
type SocketTable = Arc<RwLock<HashMap<Address, Arc<BusSocket>>>>;

/// Listener bound to a rendezvous address on a message bus.
pub struct BusListener {
    // ---
    bus: BusPtr,
    addr: Address,
    codec: CodecPtr,
    poll_interval: Duration,

    sockets: SocketTable,

    closed: AtomicBool,
    exit_tx: watch::Sender<bool>,
}

impl BusListener {
    // ---
    pub(crate) fn new(bus: BusPtr, addr: Address, codec: CodecPtr, poll_interval: Duration) -> Self {
        // ---
        let (exit_tx, _) = watch::channel(false);

        Self {
            bus,
            addr,
            codec,
            poll_interval,
            sockets: Arc::new(RwLock::new(HashMap::new())),
            closed: AtomicBool::new(false),
            exit_tx,
        }
    }

    /// Number of peers with a live socket.
    pub fn connection_count(&self) -> usize {
        read_ignore_poison(&self.sockets).len()
    }

    /// Route one inbound envelope to its peer's socket, opening a new
    /// connection if needed.
    fn dispatch(&self, env: Envelope, handler: &HandlerPtr) {
        // ---
        let Some(peer) = env.reply_to.clone() else {
            log_warn!("{}: dropping envelope without reply address", self.addr);
            return;
        };

        let existing = read_ignore_poison(&self.sockets).get(&peer).cloned();

        let env = match existing {
            Some(sock) => match sock.deliver(env) {
                Ok(()) => return,
                // closed since the lookup; fall through to a new connection
                Err(env) => env,
            },
            None => env,
        };

        if self.is_termination_marker(&env) {
            log_debug!("{}: discarding close marker from unknown peer {peer}", self.addr);
            return;
        }

        let sock = BusSocket::new(self.bus.clone(), self.codec.clone(), self.addr.clone(), peer.clone());
        if sock.deliver(env).is_err() {
            return;
        }

        {
            // close() sweeps the table under this lock after setting the flag
            let mut table = write_ignore_poison(&self.sockets);
            if self.closed.load(Ordering::Acquire) {
                log_debug!("{}: listener closed, dropping envelope from {peer}", self.addr);
                return;
            }
            table.insert(peer.clone(), sock.clone());
        }

        log_debug!("{}: accepted connection from {peer}", self.addr);

        self.spawn_connection(sock, handler.clone());
    }

    fn is_termination_marker(&self, env: &Envelope) -> bool {
        // ---
        self.codec
            .decode(&env.payload)
            .map(|msg| msg.is_close_marker())
            .unwrap_or(false)
    }

    fn spawn_connection(&self, sock: Arc<BusSocket>, handler: HandlerPtr) {
        // ---
        let peer = sock.remote_addr().clone();

        // worker
        let socket: SocketPtr = sock.clone();
        let worker = tokio::spawn(async move { handler.handle(socket).await });

        // supervisor
        let supervised = sock.clone();
        tokio::spawn(async move {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(_err)) => {
                    log_warn!("handler for {} returned error: {_err}", supervised.remote_addr());
                }
                Err(join_err) if join_err.is_panic() => {
                    log_error!("handler for {} panicked", supervised.remote_addr());
                }
                Err(_join_err) => {
                    log_debug!("handler for {} cancelled: {_join_err}", supervised.remote_addr());
                }
            }
            let _ = supervised.close().await;
        });

        // reaper
        let sockets = Arc::clone(&self.sockets);
        tokio::spawn(async move {
            sock.closed().await;

            let mut table = write_ignore_poison(&sockets);
            if table.get(&peer).is_some_and(|s| Arc::ptr_eq(s, &sock)) {
                table.remove(&peer);
                log_debug!("reaped connection from {peer}");
            }
        });
    }

    async fn close_sockets(&self) {
        // ---
        let live: Vec<Arc<BusSocket>> = write_ignore_poison(&self.sockets).values().cloned().collect();
        for sock in live {
            let _ = sock.close().await;
        }
    }
}

#[async_trait::async_trait]
impl Listener for BusListener {
    // ---
    fn addr(&self) -> &Address {
        &self.addr
    }

    /// Run the demultiplexing loop.
    ///
    /// Idle polls time out every `poll_interval` and are retried silently.
    /// Returns `Ok(())` after [`Listener::close`]; any other bus failure
    /// ends the loop and is returned.
    async fn accept(&self, handler: HandlerPtr) -> Result<()> {
        // ---
        let mut exit_rx = self.exit_tx.subscribe();
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut sub = self.bus.subscribe(Subscription::from(&self.addr)).await?;
        log_info!("{}: accepting on {}", self.bus.bus_id(), self.addr);

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = signalled(&mut exit_rx) => break Ok(()),
                next = sub.next_msg(self.poll_interval) => next,
            };

            match next {
                Ok(env) => self.dispatch(env, &handler),
                Err(TransportError::Timeout) => continue,
                Err(err) => {
                    log_error!("{}: accept loop failed: {err}", self.addr);
                    break Err(err);
                }
            }
        };

        // peers stranded by a failed bus get Eof instead of waiting forever
        self.close_sockets().await;

        if let Err(_err) = self.bus.unsubscribe(sub).await {
            log_debug!("{}: unsubscribe failed: {_err}", self.addr);
        }
        log_info!("{}: stopped accepting on {}", self.bus.bus_id(), self.addr);

        result
    }

    /// Fire the exit signal, close every live socket, and disconnect.
    async fn close(&self) -> Result<()> {
        // ---
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        self.exit_tx.send_replace(true);
        self.close_sockets().await;
        self.bus.close().await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{default_codec, MemoryBus, MemoryHub, Message};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(1);

    fn listener() -> BusListener {
        // ---
        let bus: BusPtr = Arc::new(MemoryBus::connect(MemoryHub::new()));
        BusListener::new(bus, Address::from("svc"), default_codec(), Duration::from_millis(50))
    }

    fn envelope(peer: &str, body: &'static str) -> Envelope {
        // ---
        let payload = default_codec().encode(&Message::from_body(body)).unwrap();
        Envelope::with_reply(Address::from("svc"), Address::from(peer), payload)
    }

    fn entry(l: &BusListener, peer: &str) -> Option<Arc<BusSocket>> {
        read_ignore_poison(&l.sockets).get(&Address::from(peer)).cloned()
    }

    async fn wait_for_count(l: &BusListener, expected: usize) {
        // ---
        tokio::time::timeout(WAIT, async {
            while l.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("socket table did not settle");
    }

    /// Reads until the socket ends, reporting how it ended.
    fn drain_handler(done: mpsc::UnboundedSender<TransportError>) -> HandlerPtr {
        Arc::new(move |sock: SocketPtr| {
            let done = done.clone();
            async move {
                loop {
                    if let Err(err) = sock.recv().await {
                        let _ = done.send(err);
                        return Ok::<(), TransportError>(());
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_handler_close_reaps_socket() {
        // ---
        let l = listener();
        let handler: HandlerPtr = Arc::new(|sock: SocketPtr| async move {
            sock.recv().await?;
            sock.close().await
        });

        l.dispatch(envelope("peer-a", "hi"), &handler);
        assert_eq!(l.connection_count(), 1);

        wait_for_count(&l, 0).await;
    }

    #[tokio::test]
    async fn test_replaced_entry_survives_old_reaper() {
        // ---
        let l = listener();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let handler = drain_handler(done_tx);

        // single-threaded runtime: no spawned task runs until we yield
        l.dispatch(envelope("peer", "first"), &handler);
        let old = entry(&l, "peer").unwrap();
        old.close().await.unwrap();

        l.dispatch(envelope("peer", "second"), &handler);
        let new = entry(&l, "peer").unwrap();
        assert!(!Arc::ptr_eq(&old, &new));

        // the old connection finishes and its reaper runs
        let ended = tokio::time::timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
        assert_eq!(ended, TransportError::Eof);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(l.connection_count(), 1);
        let current = entry(&l, "peer").unwrap();
        assert!(Arc::ptr_eq(&current, &new));
        assert!(!current.is_closed());

        l.close().await.unwrap();
        wait_for_count(&l, 0).await;
    }

    #[tokio::test]
    async fn test_close_marker_from_unknown_peer_opens_nothing() {
        // ---
        let l = listener();
        let (done_tx, _done_rx) = mpsc::unbounded_channel();
        let handler = drain_handler(done_tx);

        let payload = default_codec().encode(&Message::close_marker()).unwrap();
        let marker = Envelope::with_reply(Address::from("svc"), Address::from("gone"), payload);
        l.dispatch(marker, &handler);

        assert_eq!(l.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_sockets_opened_before_it() {
        // ---
        let l = listener();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let handler = drain_handler(done_tx);

        l.dispatch(envelope("peer", "hi"), &handler);
        l.close().await.unwrap();

        let ended = tokio::time::timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
        assert_eq!(ended, TransportError::Eof);
        wait_for_count(&l, 0).await;
    }

    #[tokio::test]
    async fn test_dispatch_after_close_opens_nothing() {
        // ---
        let l = listener();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: HandlerPtr = {
            let calls = calls.clone();
            Arc::new(move |sock: SocketPtr| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    sock.recv().await?;
                    sock.recv().await?;
                    Ok::<(), TransportError>(())
                }
            })
        };

        l.close().await.unwrap();
        l.dispatch(envelope("late", "x"), &handler);
        l.accept(handler.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(l.connection_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
