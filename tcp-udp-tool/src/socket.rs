//! Sockets shared between a component and its I/O tasks.
//!
//! A component keeps a [`SocketSlot`] in its state and hands clones to the
//! tasks it spawns.  The tasks reach the socket only through short
//! non-blocking polls taken under the slot's lock, so they never own it.
//! Emptying the slot drops the socket on the spot: `stop`, `disconnect` and
//! `Drop` have closed it (and released the port) by the time they return,
//! without waiting for an aborted task to be dropped by the scheduler.
//!
//! Polls on a closed slot fail with `NotConnected`.

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::events::lock;

pub(crate) struct SocketSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for SocketSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}

impl<T> SocketSlot<T> {
    pub(crate) fn new(socket: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(socket))),
        }
    }

    /// Drop the socket now.  Idempotent.
    pub(crate) fn close(&self) {
        let socket = lock(&self.inner).take();
        drop(socket);
    }

    pub(crate) fn is_open(&self) -> bool {
        lock(&self.inner).is_some()
    }

    fn poll_io<R>(
        &self,
        cx: &mut Context<'_>,
        f: impl FnOnce(&mut T, &mut Context<'_>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        match lock(&self.inner).as_mut() {
            Some(socket) => f(socket, cx),
            None => Poll::Ready(Err(closed())),
        }
    }
}

impl SocketSlot<TcpListener> {
    pub(crate) async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        poll_fn(|cx| self.poll_io(cx, |listener, cx| listener.poll_accept(cx))).await
    }
}

impl SocketSlot<TcpStream> {
    /// One read into `buf`; `Ok(0)` means the peer closed its side.
    pub(crate) async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        poll_fn(|cx| {
            let buf = &mut *buf;
            self.poll_io(cx, move |stream, cx| {
                let mut filled = ReadBuf::new(buf);
                Pin::new(stream)
                    .poll_read(cx, &mut filled)
                    .map_ok(|()| filled.filled().len())
            })
        })
        .await
    }

    pub(crate) async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let n = poll_fn(|cx| {
                self.poll_io(cx, |stream, cx| Pin::new(stream).poll_write(cx, data))
            })
            .await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            data = &data[n..];
        }
        Ok(())
    }
}

impl SocketSlot<UdpSocket> {
    pub(crate) async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        poll_fn(|cx| {
            let buf = &mut *buf;
            self.poll_io(cx, move |socket, cx| {
                let mut filled = ReadBuf::new(buf);
                socket
                    .poll_recv_from(cx, &mut filled)
                    .map_ok(|from| (filled.filled().len(), from))
            })
        })
        .await
    }

    pub(crate) async fn send_to(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
        poll_fn(|cx| self.poll_io(cx, |socket, cx| socket.poll_send_to(cx, data, to))).await
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        match lock(&self.inner).as_ref() {
            Some(socket) => socket.local_addr(),
            None => Err(closed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_releases_udp_port_immediately() {
        let slot = SocketSlot::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = slot.local_addr().unwrap();

        slot.close();
        assert!(!slot.is_open());
        assert_eq!(
            slot.local_addr().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        UdpSocket::bind(local).await.expect("port released");
    }

    #[tokio::test]
    async fn closed_listener_releases_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        let slot = SocketSlot::new(listener);

        slot.close();
        assert_eq!(
            slot.accept().await.unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        TcpListener::bind(local).await.expect("port released");
    }

    #[tokio::test]
    async fn stream_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = SocketSlot::new(client.unwrap());
        let server = SocketSlot::new(accepted.unwrap().0);

        client.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 8];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");

        client.close();
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }
}
