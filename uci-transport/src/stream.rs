//! Channel and transport traits for the UCI engine

use async_trait::async_trait;
use std::time::Duration;
use uci_core::{UciError, UciResult};

/// Bidirectional byte channel to one remote device
///
/// A channel is exclusively owned by one session; implementations do not
/// need to be internally synchronized against concurrent callers.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Set the per-operation timeout
    ///
    /// # Arguments
    ///
    /// * `timeout` - The timeout duration. None means infinite timeout.
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> UciResult<()>;

    /// Receive data from the channel
    ///
    /// # Returns
    ///
    /// Number of bytes received, or 0 if the remote end closed the channel
    async fn recv(&mut self, buf: &mut [u8]) -> UciResult<usize>;

    /// Receive exactly `buf.len()` bytes
    ///
    /// # Errors
    ///
    /// `ShortRead` if the channel closes before the buffer is filled
    async fn recv_exact(&mut self, mut buf: &mut [u8]) -> UciResult<()> {
        let expected = buf.len();
        let mut got = 0;
        while !buf.is_empty() {
            let n = self.recv(buf).await?;
            if n == 0 {
                return Err(UciError::ShortRead {
                    expected,
                    actual: got,
                });
            }
            got += n;
            buf = &mut buf[n..];
        }
        Ok(())
    }

    /// Send data on the channel
    ///
    /// # Returns
    ///
    /// Number of bytes accepted by the channel
    async fn send(&mut self, buf: &[u8]) -> UciResult<usize>;

    /// Send the whole buffer
    async fn send_all(&mut self, buf: &[u8]) -> UciResult<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.send(&buf[written..]).await?;
            if n == 0 {
                return Err(UciError::Connection(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "channel accepted zero bytes",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered outgoing data
    async fn flush(&mut self) -> UciResult<()>;

    /// Check whether the channel is closed
    fn is_closed(&self) -> bool;

    /// Close the channel, releasing the underlying resource
    ///
    /// Must succeed in releasing the resource even if the channel is
    /// already broken.
    async fn close(&mut self) -> UciResult<()>;
}

/// A channel that can also establish its own connection
#[async_trait]
pub trait Transport: Channel {
    /// Establish the physical connection
    ///
    /// # Errors
    ///
    /// `Timeout` if establishment exceeds the configured deadline,
    /// `NotEstablished` if the remote end refuses or is unreachable.
    async fn open(&mut self) -> UciResult<()>;
}
