//! The envelope for one captured byte buffer.
//!
//! A [`Piece`] is created either by a transport component the moment bytes
//! come off a socket, or by the caller right before a send.  The payload is
//! held behind an `Arc<[u8]>` so pieces are cheap to clone into history and
//! subscriber channels, and so the bytes can never change after
//! construction.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Which way the bytes travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    /// One-letter marker used by formatters (`S` / `R`).
    pub fn marker(self) -> char {
        match self {
            Self::Sent => 'S',
            Self::Received => 'R',
        }
    }
}

/// One unit of transmitted or received data.
#[derive(Debug, Clone)]
pub struct Piece {
    data: Arc<[u8]>,
    direction: Direction,
    timestamp: DateTime<Local>,
    origin: Option<SocketAddr>,
    destination: Option<SocketAddr>,
}

impl Piece {
    pub fn new(data: impl Into<Arc<[u8]>>, direction: Direction) -> Self {
        Self {
            data: data.into(),
            direction,
            timestamp: Local::now(),
            origin: None,
            destination: None,
        }
    }

    /// A piece about to be sent; endpoints are filled in once the send completes.
    pub fn sent(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(data, Direction::Sent)
    }

    /// A piece read off a socket.  `data` is copied, so the caller may reuse
    /// its receive buffer.
    pub fn received(data: &[u8], origin: SocketAddr, destination: Option<SocketAddr>) -> Self {
        Self {
            origin: Some(origin),
            destination,
            ..Self::new(data, Direction::Received)
        }
    }

    /// Same bytes and timestamp, with the endpoints actually used for the
    /// transfer attached.
    pub fn with_endpoints(&self, result: &PieceSendResult) -> Self {
        Self {
            origin: Some(result.from),
            destination: Some(result.to),
            ..self.clone()
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn origin(&self) -> Option<SocketAddr> {
        self.origin
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }
}

/// Endpoints used by a completed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSendResult {
    pub from: SocketAddr,
    pub to: SocketAddr,
}

impl fmt::Display for PieceSendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn length_matches_data() {
        let piece = Piece::sent(b"hello".to_vec());
        assert_eq!(piece.len(), 5);
        assert_eq!(piece.data(), b"hello");
        assert!(piece.is_sent());
        assert_eq!(piece.origin(), None);
    }

    #[test]
    fn received_copies_the_buffer() {
        let mut buf = *b"abcd";
        let piece = Piece::received(&buf[..3], addr("10.0.0.1:7"), None);
        buf[0] = b'z';
        assert_eq!(piece.data(), b"abc");
        assert_eq!(piece.direction(), Direction::Received);
        assert_eq!(piece.origin(), Some(addr("10.0.0.1:7")));
    }

    #[test]
    fn with_endpoints_keeps_data_and_timestamp() {
        let piece = Piece::sent(b"x".to_vec());
        let result = PieceSendResult {
            from: addr("127.0.0.1:1000"),
            to: addr("127.0.0.1:2000"),
        };
        let updated = piece.with_endpoints(&result);
        assert_eq!(updated.data(), piece.data());
        assert_eq!(updated.timestamp(), piece.timestamp());
        assert_eq!(updated.origin(), Some(result.from));
        assert_eq!(updated.destination(), Some(result.to));
        assert_eq!(piece.origin(), None);
    }

    #[test]
    fn empty_piece() {
        let piece = Piece::received(&[], addr("[::1]:9"), None);
        assert!(piece.is_empty());
        assert_eq!(piece.len(), 0);
    }

    #[test]
    fn direction_markers() {
        assert_eq!(Direction::Sent.marker(), 'S');
        assert_eq!(Direction::Received.marker(), 'R');
    }
}
