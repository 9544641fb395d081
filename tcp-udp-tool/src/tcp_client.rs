//! Outbound TCP connection.
//!
//! # Architecture
//!
//! ```text
//!  caller                      session task (one per connect)
//!    │ connect() ───spawn────▶ resolve → connect → read loop ──▶ Received
//!    │ send() ──▶ channel ──▶ writer task ──▶ OwnedWriteHalf
//!    │ disconnect() ─close──▶ socket, then abort both tasks
//! ```
//!
//! Every session gets an id.  Tasks check that their id is still the current
//! one, under the state lock, before emitting anything, so once
//! [`TcpClient::disconnect`] returns no further events for that session are
//! delivered.  A connect that completes after its session was torn down is
//! dropped silently.
//!
//! The connected stream lives in a `SocketSlot` held by the session, so
//! `disconnect` and `Drop` close it (the peer sees the FIN) before
//! returning.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::{lock, ClientStatus, Subscribers, TcpClientEvent};
use crate::net;
use crate::piece::{Piece, PieceSendResult};
use crate::socket::SocketSlot;

/// A TCP client with at most one connection at a time.
///
/// [`connect`](Self::connect) and [`send`](Self::send) spawn onto the
/// current Tokio runtime and must be called from within one.
pub struct TcpClient {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransportConfig,
    events: Subscribers<TcpClientEvent>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    session: Option<Session>,
}

struct Session {
    id: u64,
    task: JoinHandle<()>,
    link: Option<Link>,
}

/// Established half of a session.
struct Link {
    local: SocketAddr,
    remote: SocketAddr,
    stream: SocketSlot<TcpStream>,
    outbound: mpsc::UnboundedSender<Piece>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Close the stream, then cancel the tasks.
    fn abort(self) {
        if let Some(link) = self.link {
            link.stream.close();
            link.writer.abort();
        }
        self.task.abort();
    }
}

impl State {
    fn is_current(&self, id: u64) -> bool {
        matches!(&self.session, Some(s) if s.id == id)
    }
}

impl TcpClient {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events: Subscribers::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TcpClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> ClientStatus {
        match &lock(&self.shared.state).session {
            None => ClientStatus::Disconnected,
            Some(Session { link: None, .. }) => ClientStatus::Connecting,
            Some(Session { link: Some(_), .. }) => ClientStatus::Connected,
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.state)
            .session
            .as_ref()
            .and_then(|s| s.link.as_ref())
            .map(|l| l.remote)
    }

    /// Start connecting to `host:port` in the background.
    ///
    /// Does nothing while a connection is being established or is up.
    /// Failures arrive as [`TcpClientEvent::Error`] followed by a
    /// `Disconnected` status.
    pub fn connect(&self, host: &str, port: u16) {
        let mut state = lock(&self.shared.state);
        if state.session.is_some() {
            return;
        }

        state.next_id += 1;
        let id = state.next_id;
        log::debug!("[tcp-client] #{id} connecting to {host}:{port}");

        // The task blocks on the state lock before emitting, so the session
        // is always registered before it can observe itself.
        let task = tokio::spawn(run_session(
            Arc::clone(&self.shared),
            id,
            host.to_string(),
            port,
        ));
        state.session = Some(Session {
            id,
            task,
            link: None,
        });
        self.shared.events.emit(TcpClientEvent::Status {
            status: ClientStatus::Connecting,
            remote: None,
        });
    }

    /// Queue `piece` for writing.  Returns `None` if not connected.
    ///
    /// Writes are performed in order by the connection's writer task; a write
    /// failure disconnects the client.
    pub fn send(&self, piece: &Piece) -> Option<PieceSendResult> {
        let state = lock(&self.shared.state);
        let link = state.session.as_ref()?.link.as_ref()?;
        link.outbound.send(piece.clone()).ok()?;
        Some(PieceSendResult {
            from: link.local,
            to: link.remote,
        })
    }

    /// Close the connection (or abandon a pending connect) and emit
    /// `Disconnected`.
    pub fn disconnect(&self) {
        let mut state = lock(&self.shared.state);
        if let Some(session) = state.session.take() {
            log::debug!("[tcp-client] #{} disconnect requested", session.id);
            session.abort();
        }
        self.shared.events.emit(TcpClientEvent::Status {
            status: ClientStatus::Disconnected,
            remote: None,
        });
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.shared.state).session.take() {
            session.abort();
        }
    }
}

impl Shared {
    /// Tear down session `id` if it is still current and announce it.
    fn end_session(&self, id: u64) {
        let mut state = lock(&self.state);
        if !state.is_current(id) {
            return;
        }
        if let Some(session) = state.session.take() {
            session.abort();
        }
        log::debug!("[tcp-client] #{id} disconnected");
        self.events.emit(TcpClientEvent::Status {
            status: ClientStatus::Disconnected,
            remote: None,
        });
    }

    fn fail(&self, id: u64, err: TransportError) {
        let mut state = lock(&self.state);
        if !state.is_current(id) {
            log::debug!("[tcp-client] #{id} connect finished after disconnect: {err}");
            return;
        }
        state.session = None;
        log::warn!("[tcp-client] #{id} {err}");
        self.events.emit(TcpClientEvent::Error(Arc::new(err)));
        self.events.emit(TcpClientEvent::Status {
            status: ClientStatus::Disconnected,
            remote: None,
        });
    }
}

async fn open_stream(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let candidates = net::resolve(host, port).await?;
    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(TransportError::Connect {
        target: format!("{host}:{port}"),
        source: last_err.unwrap_or_else(|| std::io::ErrorKind::NotFound.into()),
    })
}

async fn run_session(shared: Arc<Shared>, id: u64, host: String, port: u16) {
    let stream = match open_stream(&host, port).await {
        Ok(stream) => stream,
        Err(err) => return shared.fail(id, err),
    };
    let (local, remote) = match (stream.local_addr(), stream.peer_addr()) {
        (Ok(local), Ok(remote)) => (local, remote),
        (Err(e), _) | (_, Err(e)) => return shared.fail(id, TransportError::Io(e)),
    };

    let stream = SocketSlot::new(stream);
    {
        let mut state = lock(&shared.state);
        let Some(session) = state.session.as_mut().filter(|s| s.id == id) else {
            return;
        };
        let (outbound, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            Arc::clone(&shared),
            id,
            stream.clone(),
            queue,
        ));
        session.link = Some(Link {
            local,
            remote,
            stream: stream.clone(),
            outbound,
            writer,
        });
        log::info!("[tcp-client] #{id} connected {local} -> {remote}");
        shared.events.emit(TcpClientEvent::Status {
            status: ClientStatus::Connected,
            remote: Some(remote),
        });
    }

    read_loop(&shared, id, &stream, local, remote).await;
    shared.end_session(id);
}

async fn read_loop(
    shared: &Shared,
    id: u64,
    stream: &SocketSlot<TcpStream>,
    local: SocketAddr,
    remote: SocketAddr,
) {
    let mut buf = vec![0u8; shared.config.tcp_buffer_size()];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                log::debug!("[tcp-client] #{id} peer closed the connection");
                return;
            }
            Ok(n) => {
                let state = lock(&shared.state);
                if !state.is_current(id) {
                    return;
                }
                shared.events.emit(TcpClientEvent::Received(Piece::received(
                    &buf[..n],
                    remote,
                    Some(local),
                )));
            }
            Err(e) => {
                log::debug!("[tcp-client] #{id} read failed: {e}");
                return;
            }
        }
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    id: u64,
    stream: SocketSlot<TcpStream>,
    mut queue: mpsc::UnboundedReceiver<Piece>,
) {
    while let Some(piece) = queue.recv().await {
        if let Err(e) = stream.write_all(piece.data()).await {
            log::debug!("[tcp-client] #{id} write failed: {e}");
            shared.end_session(id);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_is_disconnected() {
        let client = TcpClient::default();
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert_eq!(client.remote_addr(), None);
        assert!(client.send(&Piece::sent(b"x".to_vec())).is_none());
    }

    #[test]
    fn disconnect_without_connection_still_reports() {
        let client = TcpClient::default();
        let mut events = client.subscribe();
        client.disconnect();
        assert!(matches!(
            events.try_recv(),
            Ok(TcpClientEvent::Status {
                status: ClientStatus::Disconnected,
                remote: None
            })
        ));
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_pending() {
        let client = TcpClient::default();
        let mut events = client.subscribe();
        // Single-threaded test runtime: the session task cannot run before
        // the first await, so the attempt is still pending here.
        client.connect("10.255.255.1", 9);
        client.connect("10.255.255.1", 9);
        assert_eq!(client.status(), ClientStatus::Connecting);

        client.disconnect();
        assert_eq!(client.status(), ClientStatus::Disconnected);

        let mut statuses = Vec::new();
        while let Ok(TcpClientEvent::Status { status, .. }) = events.try_recv() {
            statuses.push(status);
        }
        assert_eq!(
            statuses,
            vec![ClientStatus::Connecting, ClientStatus::Disconnected]
        );
    }
}
