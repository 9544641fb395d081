//! Single-client TCP server.
//!
//! # Architecture
//!
//! ```text
//!  start() ──bind──▶ TcpListener ──▶ accept task
//!                                      │ first client   ──▶ reader task + writer task
//!                                      │ while occupied ──▶ close + ClientRejected
//!  send()  ──▶ channel ──▶ writer task ──▶ oneshot completion ──▶ caller
//!  disconnect() closes the client socket; stop() also closes the listener.
//! ```
//!
//! At most one client is served.  Connections arriving while a client is
//! active are accepted and closed straight away, and each one is announced
//! with [`TcpServerEvent::ClientRejected`], so a second client can never
//! silently replace the first.
//!
//! As in [`crate::tcp_client`], listeners and clients carry ids that are
//! re-checked under the state lock before any event is emitted.  Both the
//! listener and the client stream sit in `SocketSlot`s, so the port is
//! free again once `stop` (or `Drop`) returns.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::{lock, ServerStatus, Subscribers, TcpServerEvent};
use crate::net;
use crate::piece::{Piece, PieceSendResult};
use crate::socket::SocketSlot;

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub struct TcpServer {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransportConfig,
    events: Subscribers<TcpServerEvent>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    listener: Option<Listening>,
    client: Option<ClientLink>,
}

struct Listening {
    id: u64,
    local: SocketAddr,
    listener: SocketSlot<TcpListener>,
    accept: JoinHandle<()>,
}

struct ClientLink {
    id: u64,
    local: SocketAddr,
    remote: SocketAddr,
    stream: SocketSlot<TcpStream>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A queued write and the channel its outcome is reported on.
struct Outgoing {
    piece: Piece,
    done: oneshot::Sender<io::Result<()>>,
}

impl Listening {
    fn close(self) {
        self.listener.close();
        self.accept.abort();
    }
}

impl ClientLink {
    fn close(self) {
        self.stream.close();
        self.reader.abort();
        self.writer.abort();
    }
}

impl State {
    fn is_listening(&self, id: u64) -> bool {
        matches!(&self.listener, Some(l) if l.id == id)
    }

    fn is_client(&self, id: u64) -> bool {
        matches!(&self.client, Some(c) if c.id == id)
    }
}

impl TcpServer {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events: Subscribers::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TcpServerEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> ServerStatus {
        let state = lock(&self.shared.state);
        match (&state.listener, &state.client) {
            (None, _) => ServerStatus::Stopped,
            (Some(_), None) => ServerStatus::Started,
            (Some(_), Some(_)) => ServerStatus::ClientConnected,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.state).listener.as_ref().map(|l| l.local)
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.state).client.as_ref().map(|c| c.remote)
    }

    /// Bind `address:port` and start accepting.  Returns the bound endpoint.
    ///
    /// Already listening: returns the current endpoint without rebinding.
    pub async fn start(&self, address: &str, port: u16) -> Result<SocketAddr, TransportError> {
        if let Some(local) = self.local_addr() {
            return Ok(local);
        }

        let addr = net::parse_local_addr(address, port)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::from_bind(e, addr))?;
        let local = listener.local_addr()?;

        let mut state = lock(&self.shared.state);
        if let Some(existing) = &state.listener {
            // Lost a race with a concurrent start; ours is dropped.
            return Ok(existing.local);
        }
        state.next_id += 1;
        let id = state.next_id;
        let listener = SocketSlot::new(listener);
        let accept = tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            id,
            listener.clone(),
        ));
        state.listener = Some(Listening {
            id,
            local,
            listener,
            accept,
        });

        log::info!("[tcp-server] listening on {local}");
        self.shared.events.emit(TcpServerEvent::Status {
            status: ServerStatus::Started,
            local: Some(local),
            remote: None,
        });
        Ok(local)
    }

    /// Write `piece` to the connected client.
    ///
    /// `Ok(None)` when no client is connected; `Err` when the write itself
    /// failed, in which case the client has been disconnected.
    pub async fn send(&self, piece: &Piece) -> Result<Option<PieceSendResult>, TransportError> {
        let (done, outcome) = oneshot::channel();
        let result = {
            let state = lock(&self.shared.state);
            let Some(client) = &state.client else {
                return Ok(None);
            };
            let queued = client.outbound.send(Outgoing {
                piece: piece.clone(),
                done,
            });
            if queued.is_err() {
                return Ok(None);
            }
            PieceSendResult {
                from: client.local,
                to: client.remote,
            }
        };

        match outcome.await {
            Ok(Ok(())) => Ok(Some(result)),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            // Writer went away before reaching our piece.
            Err(_) => Err(TransportError::Io(io::ErrorKind::NotConnected.into())),
        }
    }

    /// Drop the active client and keep listening.  No-op without a client.
    pub fn disconnect(&self) {
        let id = lock(&self.shared.state).client.as_ref().map(|c| c.id);
        if let Some(id) = id {
            self.shared.drop_client(id);
        }
    }

    /// Close the client (if any) and the listener.  No-op when stopped.
    pub fn stop(&self) {
        let mut state = lock(&self.shared.state);
        let Some(listening) = state.listener.take() else {
            return;
        };
        if let Some(client) = state.client.take() {
            client.close();
        }
        let local = listening.local;
        listening.close();
        log::info!("[tcp-server] stopped listening on {local}");
        self.shared.events.emit(TcpServerEvent::Status {
            status: ServerStatus::Stopped,
            local: None,
            remote: None,
        });
    }
}

impl Default for TcpServer {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        let mut state = lock(&self.shared.state);
        if let Some(client) = state.client.take() {
            client.close();
        }
        if let Some(listening) = state.listener.take() {
            listening.close();
        }
    }
}

impl Shared {
    /// Take ownership of a freshly accepted stream, or reject it if a client
    /// is already being served.
    fn admit(self: &Arc<Self>, listen_id: u64, stream: TcpStream, remote: SocketAddr) {
        let mut state = lock(&self.state);
        let Some(listen_local) = state
            .listener
            .as_ref()
            .filter(|l| l.id == listen_id)
            .map(|l| l.local)
        else {
            return;
        };

        if let Some(active) = &state.client {
            log::info!(
                "[tcp-server] rejecting {remote}: {} is already connected",
                active.remote
            );
            drop(stream);
            self.events.emit(TcpServerEvent::ClientRejected(remote));
            return;
        }

        let local = stream.local_addr().unwrap_or(listen_local);
        state.next_id += 1;
        let id = state.next_id;
        let stream = SocketSlot::new(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            Arc::clone(self),
            id,
            stream.clone(),
            local,
            remote,
        ));
        let writer = tokio::spawn(write_loop(Arc::clone(self), id, stream.clone(), queue));
        state.client = Some(ClientLink {
            id,
            local,
            remote,
            stream,
            outbound,
            reader,
            writer,
        });

        log::info!("[tcp-server] client {remote} connected");
        self.events.emit(TcpServerEvent::Status {
            status: ServerStatus::ClientConnected,
            local: Some(listen_local),
            remote: Some(remote),
        });
    }

    /// Close client `id` if it is still the active one and fall back to
    /// listening.
    fn drop_client(&self, id: u64) {
        let mut state = lock(&self.state);
        if !state.is_client(id) {
            return;
        }
        if let Some(client) = state.client.take() {
            log::info!("[tcp-server] client {} disconnected", client.remote);
            client.close();
        }
        let listening = state.listener.as_ref().map(|l| l.local);
        self.events.emit(TcpServerEvent::Status {
            status: ServerStatus::ClientDisconnected,
            local: listening,
            remote: None,
        });
    }
}

async fn accept_loop(shared: Arc<Shared>, listen_id: u64, listener: SocketSlot<TcpListener>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => shared.admit(listen_id, stream, remote),
            Err(e) => {
                if !lock(&shared.state).is_listening(listen_id) {
                    return;
                }
                log::warn!("[tcp-server] accept failed: {e}");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    id: u64,
    stream: SocketSlot<TcpStream>,
    local: SocketAddr,
    remote: SocketAddr,
) {
    let mut buf = vec![0u8; shared.config.tcp_buffer_size()];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let state = lock(&shared.state);
                if !state.is_client(id) {
                    return;
                }
                shared.events.emit(TcpServerEvent::Received(Piece::received(
                    &buf[..n],
                    remote,
                    Some(local),
                )));
            }
            Err(e) => {
                log::debug!("[tcp-server] read from {remote} failed: {e}");
                break;
            }
        }
    }
    shared.drop_client(id);
}

async fn write_loop(
    shared: Arc<Shared>,
    id: u64,
    stream: SocketSlot<TcpStream>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(Outgoing { piece, done }) = queue.recv().await {
        let outcome = stream.write_all(piece.data()).await;
        let failed = outcome.is_err();
        if let Err(e) = &outcome {
            log::debug!("[tcp-server] write failed: {e}");
        }
        // The caller may have stopped waiting; the outcome is then moot.
        done.send(outcome).ok();
        if failed {
            shared.drop_client(id);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_is_stopped() {
        let server = TcpServer::default();
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(server.local_addr(), None);
        assert_eq!(server.client_addr(), None);
    }

    #[tokio::test]
    async fn send_without_client_is_absent() {
        let server = TcpServer::default();
        assert!(server.send(&Piece::sent(b"x".to_vec())).await.unwrap().is_none());

        server.start("127.0.0.1", 0).await.unwrap();
        assert!(server.send(&Piece::sent(b"x".to_vec())).await.unwrap().is_none());
        server.stop();
    }

    #[tokio::test]
    async fn stop_and_disconnect_are_noops_when_idle() {
        let server = TcpServer::default();
        let mut events = server.subscribe();
        server.disconnect();
        server.stop();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_twice_returns_same_endpoint() {
        let server = TcpServer::default();
        let first = server.start("127.0.0.1", 0).await.unwrap();
        let second = server.start("127.0.0.1", 0).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.status(), ServerStatus::Started);
        server.stop();
        assert_eq!(server.status(), ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn invalid_address_is_reported() {
        let server = TcpServer::default();
        let err = server.start("not-an-ip", 0).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::InvalidAddress);
        assert_eq!(server.status(), ServerStatus::Stopped);
    }
}
