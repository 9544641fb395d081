//! Error types shared by the transport components and codecs.
//!
//! Errors fall into three groups:
//! - [`TransportError`] — resource failures (bind, resolve, connect, I/O)
//!   that are reported to the caller with an [`ErrorCategory`] so the
//!   presentation layer can pick a specific message.
//! - [`ParseError`] — malformed user input rejected by a
//!   [`crate::parser::Parser`] before anything touches the network.
//! - [`PortError`] — port numbers outside the valid range.
//!
//! Peer-driven disconnects are *not* errors; they surface only as status
//! events.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Coarse classification of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The local address/port is already taken by another socket.
    AddressInUse,
    /// The address could not be parsed or is not available on this host.
    InvalidAddress,
    /// Host name resolution failed or returned nothing usable.
    Resolution,
    /// An outbound TCP connection could not be established.
    Connection,
    /// Any other socket I/O failure.
    Io,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("address {addr} is already in use")]
    AddressInUse { addr: SocketAddr },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Categorise a bind failure for `addr`.
    pub(crate) fn from_bind(err: io::Error, addr: SocketAddr) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => Self::AddressInUse { addr },
            io::ErrorKind::AddrNotAvailable => {
                Self::InvalidAddress(format!("{addr} is not available on this host"))
            }
            _ => Self::Io(err),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AddressInUse { .. } => ErrorCategory::AddressInUse,
            Self::InvalidAddress(_) => ErrorCategory::InvalidAddress,
            Self::Resolution { .. } => ErrorCategory::Resolution,
            Self::Connect { .. } => ErrorCategory::Connection,
            Self::Io(_) => ErrorCategory::Io,
        }
    }

    /// Single human-readable line suitable for an error dialog or status bar.
    pub fn user_message(&self) -> String {
        match self {
            Self::AddressInUse { addr } => format!(
                "Port {} is already in use, unable to start server.",
                addr.port()
            ),
            other => other.to_string(),
        }
    }
}

/// Rejected user input, reported before any network operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown escape sequence '\\{sequence}' at position {position}")]
    UnknownEscape { position: usize, sequence: char },

    #[error("incomplete escape sequence at position {position}")]
    IncompleteEscape { position: usize },

    #[error("invalid hex digit '{digit}' at position {position}")]
    InvalidHexDigit { position: usize, digit: char },

    #[error("odd number of hex digits")]
    OddHexLength,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    #[error("Port must be between 0 and 65535.")]
    OutOfRange(i64),

    #[error("Port must be between 1 and 65535.")]
    ZeroNotAllowed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_in_use_is_categorised() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let err = TransportError::from_bind(io::Error::from(io::ErrorKind::AddrInUse), addr);
        assert_eq!(err.category(), ErrorCategory::AddressInUse);
        assert_eq!(
            err.user_message(),
            "Port 8080 is already in use, unable to start server."
        );
    }

    #[test]
    fn addr_not_available_is_invalid_address() {
        let addr: SocketAddr = "10.255.255.1:80".parse().unwrap();
        let err =
            TransportError::from_bind(io::Error::from(io::ErrorKind::AddrNotAvailable), addr);
        assert_eq!(err.category(), ErrorCategory::InvalidAddress);
    }

    #[test]
    fn other_bind_errors_stay_io() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err =
            TransportError::from_bind(io::Error::from(io::ErrorKind::PermissionDenied), addr);
        assert_eq!(err.category(), ErrorCategory::Io);
    }

    #[test]
    fn parse_error_messages_name_the_position() {
        let err = ParseError::UnknownEscape {
            position: 3,
            sequence: 'q',
        };
        assert_eq!(err.to_string(), "unknown escape sequence '\\q' at position 3");
    }
}
