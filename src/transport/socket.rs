//! Server-side virtual socket.
//!
//! A [`BusSocket`] stands in for one logical connection demultiplexed out of
//! a listener's shared rendezvous address. Inbound envelopes are routed into
//! it by the listener; the accept handler reads them with `recv()`.
//!
//! ## Buffering
//!
//! Each socket owns a single-slot mailbox (an mpsc channel of capacity 1)
//! and an unbounded FIFO backlog. Routing appends to the backlog and, if the
//! slot is empty, promotes the oldest backlog entry into it. `recv()` takes
//! from the slot and then promotes the next entry. Both promotions run under
//! the backlog lock, so a message can never sit in the backlog while the
//! slot is empty and a receiver waits.
//!
//! Routing never waits on the consumer. A handler that stops reading lets
//! its backlog grow without bound; this is accepted so that one stalled peer
//! never stalls the listener's dispatch loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::{lock_ignore_poison, signalled};
use crate::{
    // ---
    log_debug,
    log_trace,
    Address,
    BusPtr,
    CodecPtr,
    Envelope,
    Message,
    Result,
    Socket,
    TransportError,
};

/// Virtual connection to one peer of a [`BusListener`](crate::BusListener).
pub struct BusSocket {
    // ---
    bus: BusPtr,
    codec: CodecPtr,
    local: Address,
    peer: Address,

    mailbox_tx: mpsc::Sender<Envelope>,
    mailbox_rx: tokio::sync::Mutex<mpsc::Receiver<Envelope>>,
    backlog: Mutex<VecDeque<Envelope>>,

    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl BusSocket {
    // ---
    pub(crate) fn new(bus: BusPtr, codec: CodecPtr, local: Address, peer: Address) -> Arc<Self> {
        // ---
        let (mailbox_tx, mailbox_rx) = mpsc::channel(1);
        let (close_tx, _) = watch::channel(false);

        Arc::new(Self {
            bus,
            codec,
            local,
            peer,
            mailbox_tx,
            mailbox_rx: tokio::sync::Mutex::new(mailbox_rx),
            backlog: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            close_tx,
        })
    }

    /// True once `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Messages buffered behind the mailbox slot.
    pub fn backlog_len(&self) -> usize {
        lock_ignore_poison(&self.backlog).len()
    }

    /// Route an inbound envelope into this socket. Never blocks.
    ///
    /// A closed socket refuses the envelope and hands it back. The closed
    /// flag only flips under the backlog lock, so an accepted envelope is
    /// always readable by `recv()`.
    pub(crate) fn deliver(&self, env: Envelope) -> std::result::Result<(), Envelope> {
        // ---
        let mut backlog = lock_ignore_poison(&self.backlog);
        if self.is_closed() {
            return Err(env);
        }
        backlog.push_back(env);
        self.promote(&mut backlog);
        log_trace!("{}: routed, backlog={}", self.peer, backlog.len());
        Ok(())
    }

    /// Resolves once the socket is closed.
    pub(crate) async fn closed(&self) {
        // ---
        signalled(&mut self.close_tx.subscribe()).await;
    }

    // Must be called with the backlog lock held.
    fn promote(&self, backlog: &mut VecDeque<Envelope>) {
        // ---
        let Some(env) = backlog.pop_front() else {
            return;
        };

        match self.mailbox_tx.try_send(env) {
            Ok(()) => {}
            Err(TrySendError::Full(env)) | Err(TrySendError::Closed(env)) => {
                backlog.push_front(env);
            }
        }
    }
}

#[async_trait::async_trait]
impl Socket for BusSocket {
    // ---

    /// Wait for the next message from the peer.
    ///
    /// After `close()`, messages already buffered are still returned; once
    /// they are drained the result is [`TransportError::Eof`].
    async fn recv(&self) -> Result<Message> {
        // ---
        let mut rx = self.mailbox_rx.lock().await;

        let env = if self.is_closed() {
            rx.try_recv().ok()
        } else {
            let mut close_rx = self.close_tx.subscribe();
            tokio::select! {
                biased;
                env = rx.recv() => env,
                _ = signalled(&mut close_rx) => rx.try_recv().ok(),
            }
        };

        let Some(env) = env else {
            return Err(TransportError::Eof);
        };

        {
            let mut backlog = lock_ignore_poison(&self.backlog);
            self.promote(&mut backlog);
        }

        self.codec.decode(&env.payload)
    }

    /// Publish a message to the peer's reply address.
    async fn send(&self, msg: &Message) -> Result<()> {
        // ---
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let payload = self.codec.encode(msg)?;
        self.bus.publish(Envelope::new(self.peer.clone(), payload)).await
    }

    /// Close the socket. Only the first call has an effect.
    async fn close(&self) -> Result<()> {
        // ---
        let first = {
            let _backlog = lock_ignore_poison(&self.backlog);
            self.closed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        };

        if first {
            log_debug!("{}: socket for peer {} closed", self.local, self.peer);
            self.close_tx.send_replace(true);
        }
        Ok(())
    }

    fn local_addr(&self) -> &Address {
        &self.local
    }

    fn remote_addr(&self) -> &Address {
        &self.peer
    }
}
