//! Event types raised by the transport components and the fan-out used to
//! deliver them.
//!
//! Every component owns one [`Subscribers`] list.  [`Subscribers::subscribe`]
//! hands out an unbounded receiver; emitting never blocks and never drops an
//! event for a live subscriber.  Receivers that have been dropped are pruned
//! on the next emit.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::piece::Piece;

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One sender, any number of subscribers.
pub struct Subscribers<E> {
    senders: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.senders).push(tx);
        rx
    }

    pub fn emit(&self, event: E) {
        lock(&self.senders).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        let mut senders = lock(&self.senders);
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Clone> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TCP client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub enum TcpClientEvent {
    /// Status change; `remote` is set only for [`ClientStatus::Connected`].
    Status {
        status: ClientStatus,
        remote: Option<SocketAddr>,
    },
    Received(Piece),
    /// A connection attempt failed for a reason other than a local disconnect.
    Error(Arc<TransportError>),
}

// ---------------------------------------------------------------------------
// TCP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Started,
    ClientConnected,
    ClientDisconnected,
}

#[derive(Debug, Clone)]
pub enum TcpServerEvent {
    /// `local` is the listening endpoint (absent once stopped); `remote`
    /// is the client for [`ServerStatus::ClientConnected`].
    Status {
        status: ServerStatus,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
    },
    /// A connection arrived while another client was active and was closed.
    ClientRejected(SocketAddr),
    Received(Piece),
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpStatus {
    Stopped,
    Started,
}

#[derive(Debug, Clone)]
pub enum UdpEvent {
    Status {
        status: UdpStatus,
        local: Option<SocketAddr>,
    },
    Received(Piece),
    /// The receive loop hit an unrecoverable socket error and stopped.
    Error(Arc<TransportError>),
}
