//! `tcp-udp-tool` — exchange raw byte payloads over TCP and UDP by hand.
//!
//! # Architecture
//!
//! ```text
//!   text ──Parser──▶ bytes ──Piece──▶ TcpClient / TcpServer / UdpClientServer ──▶ socket
//!                                            │
//!                            events (status, Received(Piece), errors)
//!                                            ▼
//!                              History ──Formatter──▶ display text
//! ```
//!
//! Each module has a single responsibility:
//! - [`piece`]       — the immutable envelope for one captured buffer
//! - [`parser`]      — text → bytes (plain, escaped, hex)
//! - [`formatter`]   — piece → display text (plain, hex dump)
//! - [`history`]     — bounded in-memory conversation log
//! - [`events`]      — event types and subscriber fan-out
//! - [`tcp_client`]  — outbound TCP connection
//! - [`tcp_server`]  — single-client TCP listener
//! - [`udp`]         — combined UDP sender/receiver
//! - [`net`]         — port validation, bind addresses, name resolution
//! - `socket`        — closable socket slots shared with I/O tasks
//! - [`interfaces`]  — interface enumeration and error sink contracts
//! - [`config`]      — buffer sizes and the IPv6 setting
//! - [`error`]       — error types and categories

pub mod config;
pub mod error;
pub mod events;
pub mod formatter;
pub mod history;
pub mod interfaces;
pub mod net;
pub mod parser;
pub mod piece;
mod socket;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp;

pub use config::{Settings, TransportConfig};
pub use error::{ErrorCategory, ParseError, PortError, TransportError};
pub use events::{
    ClientStatus, ServerStatus, TcpClientEvent, TcpServerEvent, UdpEvent, UdpStatus,
};
pub use formatter::{Formatter, HexFormatter, PlainTextFormatter};
pub use history::History;
pub use parser::{EscapedTextParser, HexParser, Parser, PlainTextParser};
pub use piece::{Direction, Piece, PieceSendResult};
pub use tcp_client::TcpClient;
pub use tcp_server::TcpServer;
pub use udp::UdpClientServer;
