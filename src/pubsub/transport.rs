// src/pubsub/transport.rs

//! Parses the multicast connection string and binds a multicast UDP
//! socket for it. `<protocol>://[<interface>;]<group>:<port>`, e.g.
//! `epgm://eth0;224.0.0.127:4999`.

use anyhow::{anyhow, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// The parsed pieces of a connection string. `protocol` is retained
/// for logging/diagnostics even though only multicast UDP is actually
/// implemented — any lossy-or-better datagram pub/sub transport is
/// permitted to stand in for the reference epgm protocol (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub protocol: String,
    pub interface: Option<String>,
    pub group: Ipv4Addr,
    pub port: u16,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self> {
        let (protocol, rest) = raw
            .split_once("://")
            .ok_or_else(|| anyhow!("missing '://' in connection string {raw:?}"))?;

        let (iface_and_group, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("missing port in connection string {raw:?}"))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in connection string {raw:?}"))?;

        let (interface, group) = match iface_and_group.split_once(';') {
            Some((iface, group)) => (Some(iface.to_string()), group),
            None => (None, iface_and_group),
        };
        let group: Ipv4Addr = group
            .parse()
            .with_context(|| format!("invalid multicast group in connection string {raw:?}"))?;

        Ok(Self {
            protocol: protocol.to_string(),
            interface,
            group,
            port,
        })
    }

    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.group, self.port))
    }
}

/// Binds a UDP socket to `conn.port` on all interfaces, joins the
/// multicast group named by `conn.group`, and sets it nonblocking for
/// handover to Tokio. The `interface` field is parsed as a literal
/// IPv4 address when possible; named interfaces (e.g. `eth0`) fall
/// back to the unspecified interface since resolving an interface name
/// to its address requires platform-specific lookups outside this
/// crate's scope.
pub fn bind_multicast(conn: &ConnectionString) -> Result<UdpSocket> {
    let iface_addr = conn
        .interface
        .as_deref()
        .and_then(|s| s.parse::<Ipv4Addr>().ok())
        .unwrap_or(Ipv4Addr::UNSPECIFIED);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to create multicast socket")?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, conn.port).into())
        .with_context(|| format!("failed to bind multicast socket on port {}", conn.port))?;
    socket
        .join_multicast_v4(&conn.group, &iface_addr)
        .with_context(|| format!("failed to join multicast group {}", conn.group))?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("failed to hand socket to the async runtime")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_interface() {
        let conn = ConnectionString::parse("epgm://eth0;224.0.0.127:4999").unwrap();
        assert_eq!(conn.protocol, "epgm");
        assert_eq!(conn.interface.as_deref(), Some("eth0"));
        assert_eq!(conn.group, Ipv4Addr::new(224, 0, 0, 127));
        assert_eq!(conn.port, 4999);
    }

    #[test]
    fn parses_without_interface() {
        let conn = ConnectionString::parse("udp://224.0.0.127:4999").unwrap();
        assert_eq!(conn.interface, None);
        assert_eq!(conn.group, Ipv4Addr::new(224, 0, 0, 127));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(ConnectionString::parse("not-a-connection-string").is_err());
        assert!(ConnectionString::parse("udp://224.0.0.127").is_err());
    }
}
