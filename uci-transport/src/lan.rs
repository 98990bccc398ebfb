//! LAN socket transport

use crate::stream::{Channel, Transport};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uci_core::{DEFAULT_TIMEOUT, NodeAddress, UciError, UciResult};

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream").finish()
    }
}

impl Deref for DebugTcpStream {
    type Target = TcpStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugTcpStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// LAN transport settings
#[derive(Debug, Clone)]
pub struct LanSettings {
    pub address: SocketAddr,
    pub timeout: Option<Duration>,
}

impl LanSettings {
    /// Create new LAN settings with the default timeout
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Create LAN settings with an explicit timeout
    pub fn with_timeout(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            address,
            timeout: Some(timeout),
        }
    }
}

/// LAN transport over a TCP socket
#[derive(Debug)]
pub struct LanTransport {
    stream: Option<DebugTcpStream>,
    settings: LanSettings,
    closed: bool,
}

impl LanTransport {
    /// Create a new LAN transport
    pub fn new(settings: LanSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create a LAN transport from a parsed node address
    pub fn from_node_address(address: &NodeAddress, timeout: Duration) -> UciResult<Self> {
        match address {
            NodeAddress::Lan { ip, port } => Ok(Self::new(LanSettings::with_timeout(
                SocketAddr::new(IpAddr::V4(*ip), *port),
                timeout,
            ))),
            other => Err(UciError::UnsupportedTransport(other.to_string())),
        }
    }

    fn not_connected() -> UciError {
        UciError::Connection(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "LAN stream not connected",
        ))
    }
}

#[async_trait]
impl Transport for LanTransport {
    async fn open(&mut self) -> UciResult<()> {
        if !self.closed {
            return Err(UciError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "connection has already been opened",
            )));
        }

        // Distinguish an exceeded deadline from a refused/unreachable peer.
        let stream = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, TcpStream::connect(self.settings.address))
                .await
                .map_err(|_| UciError::Timeout)?
                .map_err(|e| UciError::NotEstablished(e.to_string()))?
        } else {
            TcpStream::connect(self.settings.address)
                .await
                .map_err(|e| UciError::NotEstablished(e.to_string()))?
        };

        log::debug!("LAN transport connected to {}", self.settings.address);
        self.stream = Some(DebugTcpStream(stream));
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl Channel for LanTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> UciResult<()> {
        self.settings.timeout = timeout;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> UciResult<usize> {
        let stream = self.stream.as_mut().ok_or_else(Self::not_connected)?;

        let result = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, stream.read(buf))
                .await
                .map_err(|_| UciError::Timeout)?
                .map_err(UciError::Connection)
        } else {
            stream.read(buf).await.map_err(UciError::Connection)
        };

        match result {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                if !e.is_timeout() {
                    self.closed = true;
                }
                Err(e)
            }
        }
    }

    async fn send(&mut self, buf: &[u8]) -> UciResult<usize> {
        let stream = self.stream.as_mut().ok_or_else(Self::not_connected)?;

        if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| UciError::Timeout)?
                .map_err(UciError::Connection)
        } else {
            stream.write(buf).await.map_err(UciError::Connection)
        }
    }

    async fn flush(&mut self) -> UciResult<()> {
        let stream = self.stream.as_mut().ok_or_else(Self::not_connected)?;
        stream.flush().await.map_err(UciError::Connection)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> UciResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_lan_settings() {
        let addr: SocketAddr = "127.0.0.1:5025".parse().unwrap();
        let settings = LanSettings::new(addr);
        assert_eq!(settings.address, addr);
        assert!(settings.timeout.is_some());
    }

    #[tokio::test]
    async fn test_open_send_recv_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();

        let echo = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let mut transport =
            LanTransport::new(LanSettings::with_timeout(local, Duration::from_secs(2)));
        assert!(transport.is_closed());
        transport.open().await.unwrap();
        assert!(!transport.is_closed());

        transport.send_all(b"*IDN?\n").await.unwrap();
        transport.flush().await.unwrap();

        let mut reply = [0u8; 6];
        transport.recv_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"*IDN?\n");

        transport.close().await.unwrap();
        assert!(transport.is_closed());
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_refused_is_not_timeout() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        drop(listener);

        let mut transport =
            LanTransport::new(LanSettings::with_timeout(local, Duration::from_secs(2)));
        match transport.open().await {
            Err(UciError::NotEstablished(_)) => {}
            other => panic!("expected NotEstablished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recv_timeout_keeps_channel_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();

        let hold = tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport =
            LanTransport::new(LanSettings::with_timeout(local, Duration::from_millis(100)));
        transport.open().await.unwrap();

        let mut buf = [0u8; 4];
        match transport.recv(&mut buf).await {
            Err(UciError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
        // A receive timeout is retryable; the channel itself stays up.
        assert!(!transport.is_closed());
        hold.abort();
    }

    #[test]
    fn test_from_node_address_rejects_usb() {
        let usb = NodeAddress::Usb {
            vid: 1,
            pid: 2,
            bus_addr: 3,
        };
        assert!(matches!(
            LanTransport::from_node_address(&usb, Duration::from_secs(1)),
            Err(UciError::UnsupportedTransport(_))
        ));
    }
}
