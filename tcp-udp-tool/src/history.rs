//! In-memory conversation history.
//!
//! Keeps the most recent pieces (bounded by a capacity) together with their
//! rendering through the current [`Formatter`].  Swapping the formatter
//! re-renders everything that is kept.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::formatter::{Formatter, PlainTextFormatter};
use crate::piece::{Direction, Piece};

/// Header shown while nothing is bound or connected.
pub const DEFAULT_HEADER: &str = "Conversation";

/// Number of pieces kept unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10_000;

pub fn listening_header(local: SocketAddr) -> String {
    format!("Listening on: < {local} >")
}

pub fn connected_header(remote: SocketAddr) -> String {
    format!("Connected client: < {remote} >")
}

pub struct History {
    entries: VecDeque<Piece>,
    capacity: usize,
    formatter: Box<dyn Formatter>,
    header: String,
    rendered: String,
    bytes_sent: u64,
    bytes_received: u64,
}

impl History {
    /// `capacity` of zero is treated as one.
    pub fn new(formatter: Box<dyn Formatter>, capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            formatter,
            header: DEFAULT_HEADER.to_string(),
            rendered: String::new(),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn append(&mut self, piece: Piece) {
        match piece.direction() {
            Direction::Sent => self.bytes_sent += piece.len() as u64,
            Direction::Received => self.bytes_received += piece.len() as u64,
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.entries.push_back(piece);
            self.rerender();
        } else {
            self.formatter.format(&piece, &mut self.rendered);
            self.entries.push_back(piece);
        }
    }

    pub fn set_formatter(&mut self, formatter: Box<dyn Formatter>) {
        self.formatter = formatter;
        self.rerender();
    }

    /// Forget all pieces and reset the byte counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.rendered.clear();
        self.bytes_sent = 0;
        self.bytes_received = 0;
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn set_header(&mut self, header: impl Into<String>) {
        self.header = header.into();
    }

    pub fn text(&self) -> &str {
        &self.rendered
    }

    pub fn entries(&self) -> impl Iterator<Item = &Piece> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    fn rerender(&mut self) {
        self.rendered.clear();
        for piece in &self.entries {
            self.formatter.format(piece, &mut self.rendered);
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(Box::new(PlainTextFormatter), DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::HexFormatter;

    fn received(data: &[u8]) -> Piece {
        Piece::received(data, "127.0.0.1:9".parse().unwrap(), None)
    }

    #[test]
    fn appends_and_counts_bytes() {
        let mut history = History::default();
        history.append(Piece::sent(b"ping".to_vec()));
        history.append(received(b"pong!"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.bytes_sent(), 4);
        assert_eq!(history.bytes_received(), 5);
        assert!(history.text().contains("S: ping\n"));
        assert!(history.text().contains("R: pong!\n"));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut history = History::new(Box::new(PlainTextFormatter), 2);
        history.append(Piece::sent(b"one".to_vec()));
        history.append(Piece::sent(b"two".to_vec()));
        history.append(Piece::sent(b"three".to_vec()));

        let kept: Vec<&[u8]> = history.entries().map(|p| p.data()).collect();
        assert_eq!(kept, vec![&b"two"[..], &b"three"[..]]);
        assert!(!history.text().contains("one"));
        // Counters cover everything ever appended.
        assert_eq!(history.bytes_sent(), 11);
    }

    #[test]
    fn swapping_formatter_rerenders() {
        let mut history = History::default();
        history.append(received(b"AB"));
        assert!(history.text().ends_with("R: AB\n"));

        history.set_formatter(Box::new(HexFormatter::default()));
        assert!(history.text().ends_with("R:\n41 42\n"));
    }

    #[test]
    fn clear_resets_everything_but_header() {
        let mut history = History::default();
        history.set_header(listening_header("0.0.0.0:7".parse().unwrap()));
        history.append(received(b"x"));
        history.clear();

        assert!(history.is_empty());
        assert_eq!(history.text(), "");
        assert_eq!(history.bytes_received(), 0);
        assert_eq!(history.header(), "Listening on: < 0.0.0.0:7 >");
    }

    #[test]
    fn headers() {
        assert_eq!(History::default().header(), "Conversation");
        assert_eq!(
            connected_header("[::1]:80".parse().unwrap()),
            "Connected client: < [::1]:80 >"
        );
    }
}
