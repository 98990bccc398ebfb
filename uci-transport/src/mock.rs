//! Scripted mock transport for tests
//!
//! Used across the workspace to drive the dispatcher and the facade
//! without real hardware. The mock plays back canned replies, can stay
//! silent to provoke timeouts, and records every sent frame so tests can
//! assert byte-level wire behavior.

use crate::stream::{Channel, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uci_core::{UciError, UciResult};

/// Shared record of frames sent through a [`MockTransport`]
///
/// Each `send` call is recorded as one frame, in arrival order.
pub type WireLog = Arc<Mutex<Vec<Vec<u8>>>>;

#[derive(Debug)]
struct MockScript {
    replies: VecDeque<Vec<u8>>,
    /// After the script runs dry: signal EOF instead of staying silent
    eof_when_drained: bool,
    /// Latency added before every reply
    reply_latency: Duration,
    /// Latency added before every send is accepted
    send_latency: Duration,
    /// Delay before `open` succeeds
    accept_delay: Duration,
    /// `open` fails with `NotEstablished`
    refuse_connect: bool,
    /// Every `send` fails with a connection error
    break_on_send: bool,
}

/// Scripted in-memory transport
#[derive(Debug)]
pub struct MockTransport {
    script: MockScript,
    wire: WireLog,
    timeout: Option<Duration>,
    closed: bool,
}

impl MockTransport {
    /// A mock that accepts immediately and stays silent until the caller's
    /// timeout expires
    pub fn new() -> Self {
        Self {
            script: MockScript {
                replies: VecDeque::new(),
                eof_when_drained: false,
                reply_latency: Duration::ZERO,
                send_latency: Duration::ZERO,
                accept_delay: Duration::ZERO,
                refuse_connect: false,
                break_on_send: false,
            },
            wire: Arc::new(Mutex::new(Vec::new())),
            timeout: None,
            closed: true,
        }
    }

    /// Queue one reply to hand out on a later `recv`
    pub fn with_reply(mut self, reply: impl Into<Vec<u8>>) -> Self {
        self.script.replies.push_back(reply.into());
        self
    }

    /// Signal EOF (remote closed) once all queued replies are consumed
    pub fn with_eof_when_drained(mut self) -> Self {
        self.script.eof_when_drained = true;
        self
    }

    /// Add latency before each reply
    pub fn with_reply_latency(mut self, latency: Duration) -> Self {
        self.script.reply_latency = latency;
        self
    }

    /// Add latency before each send is accepted
    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.script.send_latency = latency;
        self
    }

    /// Delay connection acceptance
    pub fn with_accept_delay(mut self, delay: Duration) -> Self {
        self.script.accept_delay = delay;
        self
    }

    /// Refuse the connection outright
    pub fn refusing_connect(mut self) -> Self {
        self.script.refuse_connect = true;
        self
    }

    /// Fail every send with a connection break
    pub fn breaking_on_send(mut self) -> Self {
        self.script.break_on_send = true;
        self
    }

    /// Handle to the recorded wire frames, valid after the mock is moved
    /// into a session
    pub fn wire(&self) -> WireLog {
        Arc::clone(&self.wire)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> UciResult<()> {
        if !self.script.accept_delay.is_zero() {
            tokio::time::sleep(self.script.accept_delay).await;
        }
        if self.script.refuse_connect {
            return Err(UciError::NotEstablished("mock refused connection".into()));
        }
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl Channel for MockTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> UciResult<()> {
        self.timeout = timeout;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> UciResult<usize> {
        if !self.script.reply_latency.is_zero() {
            // A reply slower than the channel timeout is never observed.
            if let Some(timeout) = self.timeout {
                if self.script.reply_latency > timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(UciError::Timeout);
                }
            }
            tokio::time::sleep(self.script.reply_latency).await;
        }

        let next = self.script.replies.pop_front();
        match next {
            Some(mut reply) => {
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                if n < reply.len() {
                    // Hand the remainder back for the next recv.
                    reply.drain(..n);
                    self.script.replies.push_front(reply);
                }
                Ok(n)
            }
            None if self.script.eof_when_drained => {
                self.closed = true;
                Ok(0)
            }
            None => {
                // Silent device: wait out the caller's budget.
                let wait = self.timeout.unwrap_or(Duration::from_secs(30));
                tokio::time::sleep(wait).await;
                Err(UciError::Timeout)
            }
        }
    }

    async fn send(&mut self, buf: &[u8]) -> UciResult<usize> {
        if !self.script.send_latency.is_zero() {
            // A send slower than the channel timeout never completes.
            if let Some(timeout) = self.timeout {
                if self.script.send_latency > timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(UciError::Timeout);
                }
            }
            tokio::time::sleep(self.script.send_latency).await;
        }
        if self.script.break_on_send {
            self.closed = true;
            return Err(UciError::Connection(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock connection break",
            )));
        }
        self.wire.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    async fn flush(&mut self) -> UciResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> UciResult<()> {
        self.closed = true;
        Ok(())
    }
}
