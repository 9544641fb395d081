//! Narrow contracts for the collaborators around the transport layer:
//! local interface enumeration and error reporting.
//!
//! The transport components never call these themselves; the front end
//! uses them to offer bind addresses and to show reported errors.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use tokio::sync::watch;

/// Addresses of one active local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

pub trait InterfaceProvider {
    fn active_interfaces(&self) -> Vec<LocalInterface>;
}

/// A fixed interface list.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<LocalInterface>);

impl InterfaceProvider for StaticInterfaces {
    fn active_interfaces(&self) -> Vec<LocalInterface> {
        self.0.clone()
    }
}

/// Discovers the loopback interface and the source addresses the routing
/// table would pick for outbound traffic.
///
/// Connecting a UDP socket only consults the routing table, nothing is
/// sent.  Hosts without a default route simply report no routed address.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteProbe;

const PROBE_V4: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 9);
const PROBE_V6: SocketAddr = SocketAddr::new(
    IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
    9,
);

fn routed_source(bind: &str, probe: SocketAddr) -> Option<IpAddr> {
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(probe).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}

impl InterfaceProvider for RouteProbe {
    fn active_interfaces(&self) -> Vec<LocalInterface> {
        let mut interfaces = vec![LocalInterface {
            name: "loopback".into(),
            ipv4: Some(Ipv4Addr::LOCALHOST),
            ipv6: Some(Ipv6Addr::LOCALHOST),
        }];

        let ipv4 = match routed_source("0.0.0.0:0", PROBE_V4) {
            Some(IpAddr::V4(ip)) => Some(ip),
            _ => None,
        };
        let ipv6 = match routed_source("[::]:0", PROBE_V6) {
            Some(IpAddr::V6(ip)) => Some(ip),
            _ => None,
        };
        if ipv4.is_some() || ipv6.is_some() {
            interfaces.push(LocalInterface {
                name: "default route".into(),
                ipv4,
                ipv6,
            });
        }
        interfaces
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Wildcard address (all interfaces of one family).
    Any,
    Specific,
}

/// One entry of the bind-address selection list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindChoice {
    pub kind: BindKind,
    pub addr: IpAddr,
}

impl fmt::Display for BindChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BindKind::Any => write!(f, "Any ({})", self.addr),
            BindKind::Specific => write!(f, "{}", self.addr),
        }
    }
}

/// Bind addresses to offer: the IPv4 wildcard, the IPv6 wildcard when IPv6
/// is enabled, then each interface's IPv4 address and (with IPv6) its IPv6
/// address.  The first entry is the default selection.
pub fn bind_choices(provider: &dyn InterfaceProvider, ipv6: bool) -> Vec<BindChoice> {
    let mut choices = vec![BindChoice {
        kind: BindKind::Any,
        addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    }];
    if ipv6 {
        choices.push(BindChoice {
            kind: BindKind::Any,
            addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
    }

    for interface in provider.active_interfaces() {
        if let Some(v4) = interface.ipv4 {
            choices.push(BindChoice {
                kind: BindKind::Specific,
                addr: IpAddr::V4(v4),
            });
        }
        if let (Some(v6), true) = (interface.ipv6, ipv6) {
            choices.push(BindChoice {
                kind: BindKind::Specific,
                addr: IpAddr::V6(v6),
            });
        }
    }
    choices
}

/// The bind-address list, kept in step with the IPv6 setting.
pub struct BindChoiceWatch<P> {
    provider: P,
    ipv6: watch::Receiver<bool>,
}

impl<P: InterfaceProvider> BindChoiceWatch<P> {
    /// `ipv6` usually comes from [`crate::Settings::watch_ipv6`].
    pub fn new(provider: P, ipv6: watch::Receiver<bool>) -> Self {
        Self { provider, ipv6 }
    }

    pub fn current(&mut self) -> Vec<BindChoice> {
        let ipv6 = *self.ipv6.borrow_and_update();
        bind_choices(&self.provider, ipv6)
    }

    /// Wait for the IPv6 flag to change and return the rebuilt list.
    /// `None` once the settings are gone.
    pub async fn changed(&mut self) -> Option<Vec<BindChoice>> {
        self.ipv6.changed().await.ok()?;
        log::debug!("[interfaces] ipv6 setting changed, rebuilding bind list");
        Some(self.current())
    }
}

/// Receives human-readable error messages for display.
pub trait ErrorSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Sends reported errors to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, message: &str) {
        log::error!("{message}");
    }
}
