//! Textual multiaddrs: `/ip4/127.0.0.1/tcp/4001/p2p/<peer-id>`.
//!
//! Only the components a TCP node needs are understood: `ip4`, `ip6`, `dns`,
//! `dns4`, `dns6`, `tcp` and `p2p`.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use crate::error::AddrError;
use crate::identity::PeerId;

/// One component of a multiaddr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Dns(String),
    Dns4(String),
    Dns6(String),
    Tcp(u16),
    P2p(PeerId),
}

impl Protocol {
    fn name(&self) -> &'static str {
        match self {
            Protocol::Ip4(_) => "ip4",
            Protocol::Ip6(_) => "ip6",
            Protocol::Dns(_) => "dns",
            Protocol::Dns4(_) => "dns4",
            Protocol::Dns6(_) => "dns6",
            Protocol::Tcp(_) => "tcp",
            Protocol::P2p(_) => "p2p",
        }
    }

    fn parse(name: &str, value: &str) -> Result<Self, AddrError> {
        let invalid = || AddrError::InvalidValue {
            protocol: name.to_string(),
            value: value.to_string(),
        };
        match name {
            "ip4" => value.parse().map(Protocol::Ip4).map_err(|_| invalid()),
            "ip6" => value.parse().map(Protocol::Ip6).map_err(|_| invalid()),
            "dns" => Ok(Protocol::Dns(value.to_string())),
            "dns4" => Ok(Protocol::Dns4(value.to_string())),
            "dns6" => Ok(Protocol::Dns6(value.to_string())),
            "tcp" => value.parse().map(Protocol::Tcp).map_err(|_| invalid()),
            "p2p" => value.parse().map(Protocol::P2p).map_err(|_| invalid()),
            other => Err(AddrError::UnknownProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ip4(ip) => write!(f, "/ip4/{ip}"),
            Protocol::Ip6(ip) => write!(f, "/ip6/{ip}"),
            Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) => {
                write!(f, "/{}/{host}", self.name())
            }
            Protocol::Tcp(port) => write!(f, "/tcp/{port}"),
            Protocol::P2p(peer) => write!(f, "/p2p/{peer}"),
        }
    }
}

/// A parsed multiaddr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiaddr {
    components: Vec<Protocol>,
}

impl Multiaddr {
    /// `/ip4|ip6/<ip>/tcp/<port>` for a socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(ip) => Protocol::Ip4(ip),
            IpAddr::V6(ip) => Protocol::Ip6(ip),
        };
        Self {
            components: vec![ip, Protocol::Tcp(addr.port())],
        }
    }

    /// Append a component.
    pub fn with(mut self, protocol: Protocol) -> Self {
        self.components.push(protocol);
        self
    }

    pub fn components(&self) -> &[Protocol] {
        &self.components
    }

    /// The `/p2p` component, if any.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.components.iter().find_map(|p| match p {
            Protocol::P2p(peer) => Some(*peer),
            _ => None,
        })
    }

    /// The address with every `/p2p` component removed.
    pub fn without_peer_id(&self) -> Self {
        Self {
            components: self
                .components
                .iter()
                .filter(|p| !matches!(p, Protocol::P2p(_)))
                .cloned()
                .collect(),
        }
    }

    /// Resolve to socket addresses for a TCP connect.
    ///
    /// `dns4`/`dns6` results are filtered to the matching address family.
    pub async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let not_dialable = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                AddrError::NotDialable(self.to_string()),
            )
        };
        let host = self
            .components
            .iter()
            .find(|p| {
                matches!(
                    p,
                    Protocol::Ip4(_)
                        | Protocol::Ip6(_)
                        | Protocol::Dns(_)
                        | Protocol::Dns4(_)
                        | Protocol::Dns6(_)
                )
            })
            .ok_or_else(not_dialable)?;
        let port = self
            .components
            .iter()
            .find_map(|p| match p {
                Protocol::Tcp(port) => Some(*port),
                _ => None,
            })
            .ok_or_else(not_dialable)?;

        match host {
            Protocol::Ip4(ip) => Ok(vec![SocketAddr::new(IpAddr::V4(*ip), port)]),
            Protocol::Ip6(ip) => Ok(vec![SocketAddr::new(IpAddr::V6(*ip), port)]),
            Protocol::Dns(name) => Ok(tokio::net::lookup_host((name.as_str(), port))
                .await?
                .collect()),
            Protocol::Dns4(name) => Ok(tokio::net::lookup_host((name.as_str(), port))
                .await?
                .filter(SocketAddr::is_ipv4)
                .collect()),
            Protocol::Dns6(name) => Ok(tokio::net::lookup_host((name.as_str(), port))
                .await?
                .filter(SocketAddr::is_ipv6)
                .collect()),
            _ => Err(not_dialable()),
        }
    }
}

impl FromStr for Multiaddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| AddrError::MissingLeadingSlash(s.to_string()))?;

        let mut components = Vec::new();
        let mut parts = rest.split('/');
        while let Some(name) = parts.next() {
            if name.is_empty() {
                return Err(AddrError::UnknownProtocol(String::new()));
            }
            let value = parts
                .next()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AddrError::MissingValue(name.to_string()))?;
            components.push(Protocol::parse(name, value)?);
        }
        Ok(Self { components })
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.components {
            write!(f, "{component}")?;
        }
        Ok(())
    }
}
