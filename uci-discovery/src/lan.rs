//! LAN discovery probe
//!
//! Broadcasts the identity query over UDP to every candidate port and
//! collects the replies that arrive before the deadline. Instruments
//! answer from their command port, so the reply's source address
//! round-trips directly into an openable `lan://` address.

use crate::directory::{DiscoveryFilter, DiscoveryProbe};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use uci_core::{NodeAddress, NodeDescriptor, NodeType, UciError, UciResult};
use uci_transport::{Channel, LanSettings, LanTransport, Transport};

/// Default instrument command port probed when the filter names none
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Identity query broadcast when the filter carries no message
pub const DEFAULT_QUERY: &str = "*IDN?";

const MAX_REPLY: usize = 512;

/// UDP broadcast probe for LAN instruments
#[derive(Debug, Clone)]
pub struct LanProbe {
    broadcast: Ipv4Addr,
}

impl LanProbe {
    /// Probe broadcasting to the local network
    pub fn new() -> Self {
        Self {
            broadcast: Ipv4Addr::BROADCAST,
        }
    }

    /// Probe with an explicit broadcast/multicast target (tests use the
    /// loopback address here)
    pub fn with_broadcast(broadcast: Ipv4Addr) -> Self {
        Self { broadcast }
    }
}

impl Default for LanProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryProbe for LanProbe {
    fn node_type(&self) -> NodeType {
        NodeType::Lan
    }

    async fn scan(
        &self,
        filter: &DiscoveryFilter,
        timeout: Duration,
    ) -> UciResult<Vec<NodeDescriptor>> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(UciError::Connection)?;
        socket.set_broadcast(true).map_err(UciError::Connection)?;

        let query = if filter.query_message.is_empty() {
            DEFAULT_QUERY
        } else {
            &filter.query_message
        };
        let ports: Vec<u16> = if filter.ports.is_empty() {
            vec![DEFAULT_SCPI_PORT]
        } else {
            filter.ports.clone()
        };

        for port in &ports {
            let target = SocketAddr::new(IpAddr::V4(self.broadcast), *port);
            if let Err(e) = socket.send_to(query.as_bytes(), target).await {
                log::debug!("LAN discovery send to {target} failed: {e}");
            }
        }

        let deadline = Instant::now() + timeout;
        let mut found = Vec::new();
        let mut buf = [0u8; MAX_REPLY];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, peer))) => {
                    let IpAddr::V4(ip) = peer.ip() else { continue };
                    let idn = String::from_utf8_lossy(&buf[..len]);
                    found.push(NodeDescriptor::from_idn(
                        NodeAddress::Lan {
                            ip,
                            port: peer.port(),
                        },
                        &idn,
                    ));
                }
                Ok(Err(e)) => {
                    log::debug!("LAN discovery receive failed: {e}");
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(found)
    }

    async fn probe_address(
        &self,
        address: &NodeAddress,
        timeout: Duration,
    ) -> UciResult<NodeDescriptor> {
        let NodeAddress::Lan { ip, port } = address else {
            return Err(UciError::UnsupportedTransport(address.to_string()));
        };

        // Single-shot validation: connect, ask for the identity, hang up.
        let sock_addr = SocketAddr::new(IpAddr::V4(*ip), *port);
        let mut transport = LanTransport::new(LanSettings::with_timeout(sock_addr, timeout));
        transport.open().await?;
        transport.send_all(b"*IDN?\n").await?;
        transport.flush().await?;

        let mut buf = [0u8; MAX_REPLY];
        let idn = match transport.recv(&mut buf).await {
            Ok(n) if n > 0 => String::from_utf8_lossy(&buf[..n]).into_owned(),
            // A reachable endpoint that stays quiet is still a valid node.
            _ => String::new(),
        };
        let _ = transport.close().await;

        Ok(NodeDescriptor::from_idn(address.clone(), &idn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_collects_udp_replies() {
        // Mock instrument: a UDP socket answering the identity query.
        let instrument = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = instrument.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = instrument.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?");
            instrument
                .send_to(b"Acme,MP7500,SN001,1.0", peer)
                .await
                .unwrap();
        });

        let probe = LanProbe::with_broadcast(Ipv4Addr::LOCALHOST);
        let filter = DiscoveryFilter {
            ports: vec![port],
            ..Default::default()
        };
        let found = probe
            .scan(&filter, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "MP7500");
        assert_eq!(
            found[0].address,
            NodeAddress::Lan {
                ip: Ipv4Addr::LOCALHOST,
                port,
            }
        );
    }

    #[tokio::test]
    async fn test_scan_without_answers_is_empty() {
        let probe = LanProbe::with_broadcast(Ipv4Addr::LOCALHOST);
        let filter = DiscoveryFilter {
            ports: vec![1], // nobody listens on port 1
            ..Default::default()
        };
        let found = probe
            .scan(&filter, Duration::from_millis(150))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_probe_address_over_tcp() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\n");
            sock.write_all(b"Acme,MP7500,SN001,1.0\n").await.unwrap();
        });

        let probe = LanProbe::new();
        let address = NodeAddress::Lan {
            ip: Ipv4Addr::LOCALHOST,
            port: local.port(),
        };
        let node = probe
            .probe_address(&address, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(node.serial, "SN001");
        assert_eq!(node.uci_addr(), format!("lan://127.0.0.1:{}", local.port()));
    }
}
