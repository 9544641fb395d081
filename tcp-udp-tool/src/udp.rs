//! Combined UDP sender/receiver built on one socket.
//!
//! The component owns at most one `tokio::net::UdpSocket`:
//! - [`UdpClientServer::start`] binds it to a chosen endpoint and spawns the
//!   receive loop.
//! - [`UdpClientServer::send_async`] sends through whatever socket is open.
//!   If none is, it binds an ephemeral socket on the unspecified address of
//!   the destination's family and keeps it for later sends (no receive loop
//!   runs on it).  A later `start` replaces it.
//! - [`UdpClientServer::stop`] closes the socket before returning; the
//!   socket sits in a `SocketSlot` that the receive task only borrows.
//!
//! Every datagram becomes exactly one [`Piece`]; a zero-length datagram is
//! a zero-length piece, never an end-of-stream signal.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::{lock, Subscribers, UdpEvent, UdpStatus};
use crate::net;
use crate::piece::{Piece, PieceSendResult};
use crate::socket::SocketSlot;

pub struct UdpClientServer {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransportConfig,
    events: Subscribers<UdpEvent>,
    state: Mutex<State>,
    /// One send at a time: a socket keeps a single pending-send waker.
    send_gate: AsyncMutex<()>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    socket: Option<SocketSlot<UdpSocket>>,
    receiving: Option<Receiving>,
}

struct Receiving {
    id: u64,
    local: SocketAddr,
    task: JoinHandle<()>,
}

impl State {
    fn is_receiving(&self, id: u64) -> bool {
        matches!(&self.receiving, Some(r) if r.id == id)
    }
}

/// Errors a UDP receive can report for an earlier send (ICMP port
/// unreachable on some platforms).  They say nothing about this socket.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

impl UdpClientServer {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events: Subscribers::new(),
                state: Mutex::new(State::default()),
                send_gate: AsyncMutex::new(()),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<UdpEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> UdpStatus {
        if lock(&self.shared.state).receiving.is_some() {
            UdpStatus::Started
        } else {
            UdpStatus::Stopped
        }
    }

    /// Endpoint of the open socket, whether bound by `start` or lazily by a send.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.state)
            .socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    /// Bind `address:port` and start receiving.  Returns the bound endpoint.
    ///
    /// Already started: returns the current endpoint without rebinding.
    pub async fn start(&self, address: &str, port: u16) -> Result<SocketAddr, TransportError> {
        if let Some(local) = lock(&self.shared.state).receiving.as_ref().map(|r| r.local) {
            return Ok(local);
        }

        let addr = net::parse_local_addr(address, port)?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::from_bind(e, addr))?;
        let local = socket.local_addr()?;
        let socket = SocketSlot::new(socket);

        let mut state = lock(&self.shared.state);
        if let Some(existing) = &state.receiving {
            return Ok(existing.local);
        }
        state.next_id += 1;
        let id = state.next_id;
        let task = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            id,
            socket.clone(),
            local,
        ));
        if let Some(send_only) = state.socket.replace(socket) {
            log::debug!("[udp] replacing send-only socket with {local}");
            send_only.close();
        }
        state.receiving = Some(Receiving { id, local, task });

        log::info!("[udp] listening on {local}");
        self.shared.events.emit(UdpEvent::Status {
            status: UdpStatus::Started,
            local: Some(local),
        });
        Ok(local)
    }

    /// Close the socket.  Emits `Stopped` if the receive side was running.
    pub fn stop(&self) {
        let mut state = lock(&self.shared.state);
        if let Some(socket) = state.socket.take() {
            socket.close();
        }
        if let Some(receiving) = state.receiving.take() {
            receiving.task.abort();
            log::info!("[udp] stopped listening on {}", receiving.local);
            self.shared.events.emit(UdpEvent::Status {
                status: UdpStatus::Stopped,
                local: None,
            });
        }
    }

    /// Resolve `host:port` and send `piece` as one datagram.
    ///
    /// Returns the source and destination endpoints actually used.
    pub async fn send_async(
        &self,
        host: &str,
        port: u16,
        piece: &Piece,
    ) -> Result<PieceSendResult, TransportError> {
        let candidates = net::resolve(host, port).await?;
        let _turn = self.shared.send_gate.lock().await;
        let (socket, to) = self.socket_for(host, &candidates).await?;
        let from = socket.local_addr()?;
        socket.send_to(piece.data(), to).await?;
        log::debug!("[udp] sent {} byte(s) {from} -> {to}", piece.len());
        Ok(PieceSendResult { from, to })
    }

    /// The open socket and a destination of its family, binding an ephemeral
    /// socket first if none is open.
    async fn socket_for(
        &self,
        host: &str,
        candidates: &[SocketAddr],
    ) -> Result<(SocketSlot<UdpSocket>, SocketAddr), TransportError> {
        let existing = lock(&self.shared.state).socket.clone();
        let socket = match existing {
            Some(socket) => socket,
            None => {
                let first = candidates[0];
                let bind_addr = net::ephemeral_for(first);
                let fresh = UdpSocket::bind(bind_addr)
                    .await
                    .map_err(|e| TransportError::from_bind(e, bind_addr))?;
                let mut state = lock(&self.shared.state);
                // A concurrent start or send may have opened one meanwhile.
                state
                    .socket
                    .get_or_insert_with(|| SocketSlot::new(fresh))
                    .clone()
            }
        };

        let local = socket.local_addr()?;
        let to = net::pick_family(candidates, Some(local)).ok_or_else(|| {
            let family = if local.is_ipv4() { "IPv4" } else { "IPv6" };
            TransportError::InvalidAddress(format!("{host} has no {family} address"))
        })?;
        Ok((socket, to))
    }
}

impl Default for UdpClientServer {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Drop for UdpClientServer {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        if let Some(socket) = state.socket.take() {
            socket.close();
        }
        if let Some(receiving) = state.receiving.take() {
            receiving.task.abort();
        }
    }
}

impl Shared {
    fn fail_receive(&self, id: u64, err: io::Error) {
        let mut state = lock(&self.state);
        if !state.is_receiving(id) {
            return;
        }
        state.receiving = None;
        if let Some(socket) = state.socket.take() {
            socket.close();
        }
        log::warn!("[udp] receive failed, closing socket: {err}");
        self.events
            .emit(UdpEvent::Error(Arc::new(TransportError::Io(err))));
        self.events.emit(UdpEvent::Status {
            status: UdpStatus::Stopped,
            local: None,
        });
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    id: u64,
    socket: SocketSlot<UdpSocket>,
    local: SocketAddr,
) {
    let mut buf = vec![0u8; shared.config.udp_buffer_size()];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => {
                let state = lock(&shared.state);
                if !state.is_receiving(id) {
                    return;
                }
                shared
                    .events
                    .emit(UdpEvent::Received(Piece::received(&buf[..n], from, Some(local))));
            }
            Err(e) if is_transient(&e) => {
                log::debug!("[udp] ignoring receive error: {e}");
            }
            Err(e) => {
                shared.fail_receive(id, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(is_transient(&io::ErrorKind::ConnectionReset.into()));
        assert!(is_transient(&io::ErrorKind::ConnectionRefused.into()));
        assert!(!is_transient(&io::ErrorKind::PermissionDenied.into()));
    }

    #[tokio::test]
    async fn send_before_start_binds_ephemeral_socket() {
        let udp = UdpClientServer::default();
        assert_eq!(udp.local_addr(), None);

        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = sink.local_addr().unwrap();

        let result = udp
            .send_async("127.0.0.1", target.port(), &Piece::sent(b"a".to_vec()))
            .await
            .unwrap();
        assert_eq!(result.to, target);
        assert_ne!(result.from.port(), 0);
        assert_eq!(udp.status(), UdpStatus::Stopped);

        // The ephemeral socket is reused.
        let again = udp
            .send_async("127.0.0.1", target.port(), &Piece::sent(b"b".to_vec()))
            .await
            .unwrap();
        assert_eq!(again.from, result.from);

        let mut buf = [0u8; 8];
        let (n, from) = sink.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"a");
        assert_eq!(from.port(), result.from.port());
    }

    #[tokio::test]
    async fn family_mismatch_is_reported() {
        let udp = UdpClientServer::default();
        udp.start("127.0.0.1", 0).await.unwrap();
        let err = udp
            .send_async("::1", 9, &Piece::sent(b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::InvalidAddress);
        udp.stop();
    }

    #[tokio::test]
    async fn stop_closes_send_only_socket_silently() {
        let udp = UdpClientServer::default();
        let mut events = udp.subscribe();
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = sink.local_addr().unwrap().port();
        udp.send_async("127.0.0.1", port, &Piece::sent(Vec::new()))
            .await
            .unwrap();
        assert!(udp.local_addr().is_some());

        udp.stop();
        assert_eq!(udp.local_addr(), None);
        assert!(events.try_recv().is_err());
    }
}
