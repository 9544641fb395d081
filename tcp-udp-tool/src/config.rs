//! Tunable parameters and the shared IPv6 setting.

use tokio::sync::watch;

/// Receive buffer used by the TCP client and server.
pub const DEFAULT_TCP_BUFFER_SIZE: usize = 8192;

/// Largest UDP payload; datagrams longer than the buffer are truncated.
pub const DEFAULT_UDP_BUFFER_SIZE: usize = 65_535;

/// Socket buffer sizes shared by all transport components.
///
/// Both sizes are at least one; they can only be set through the
/// clamping builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    tcp_buffer_size: usize,
    udp_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_buffer_size: DEFAULT_TCP_BUFFER_SIZE,
            udp_buffer_size: DEFAULT_UDP_BUFFER_SIZE,
        }
    }
}

impl TransportConfig {
    /// Zero is bumped to one so a read can never be mistaken for EOF.
    pub fn with_tcp_buffer_size(mut self, size: usize) -> Self {
        self.tcp_buffer_size = size.max(1);
        self
    }

    pub fn with_udp_buffer_size(mut self, size: usize) -> Self {
        self.udp_buffer_size = size.max(1);
        self
    }

    /// Bytes requested per TCP read.  Each read yields at most one piece.
    pub fn tcp_buffer_size(&self) -> usize {
        self.tcp_buffer_size
    }

    /// Bytes reserved for one UDP datagram.
    pub fn udp_buffer_size(&self) -> usize {
        self.udp_buffer_size
    }
}

/// Application settings the transport layer's collaborators read.
///
/// Only the IPv6 flag lives here; changes are published through a watch
/// channel so the bind-address list can be rebuilt.
#[derive(Debug)]
pub struct Settings {
    ipv6: watch::Sender<bool>,
}

impl Settings {
    pub fn new(ipv6_enabled: bool) -> Self {
        let (ipv6, _) = watch::channel(ipv6_enabled);
        Self { ipv6 }
    }

    pub fn ipv6_enabled(&self) -> bool {
        *self.ipv6.borrow()
    }

    /// Update the flag; watchers are only notified when the value changes.
    pub fn set_ipv6_enabled(&self, enabled: bool) {
        self.ipv6.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        });
    }

    pub fn watch_ipv6(&self) -> watch::Receiver<bool> {
        self.ipv6.subscribe()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(false)
    }
}
