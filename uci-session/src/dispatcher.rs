//! Per-session command dispatcher
//!
//! The dispatcher turns one command request into one complete wire frame
//! and one correlated reply, under a single time budget shared by the
//! send and receive phases. Its state machine is:
//!
//! ```text
//! Idle -> Sending -> AwaitingReply -> Idle   (success)
//!      -> Idle                               (clean failure: timeout)
//!      -> Idle + broken flag                 (ambiguous mid-transfer failure)
//! ```
//!
//! Exactly one command is in flight per session; a concurrent caller on
//! the same handle fails immediately with `Busy` (see `Session::acquire`).

use crate::session::{Session, SessionInner};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use uci_core::{CommandRequest, UciError, UciResult, effective_timeout};

/// Dispatcher state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// No command in flight
    #[default]
    Idle,
    /// Request frame is being flushed onto the transport
    Sending,
    /// Frame sent, waiting for the correlated reply
    AwaitingReply,
}

impl DispatchState {
    /// True when a new command may start
    pub fn is_idle(&self) -> bool {
        matches!(self, DispatchState::Idle)
    }
}

/// Build the wire frame for a command plus optional payload
///
/// The command text is newline-terminated on the wire; the payload is
/// appended raw. An embedded newline inside the command would smuggle a
/// second command into the frame and is rejected.
fn build_frame(command: &str, payload: &[u8]) -> UciResult<Vec<u8>> {
    let trimmed = command.trim_end_matches(['\r', '\n']);
    if trimmed.contains('\n') || trimmed.contains('\r') {
        return Err(UciError::SingleCommandOnly);
    }
    if trimmed.is_empty() && payload.is_empty() {
        return Err(UciError::InvalidArgument("empty command".into()));
    }
    let mut frame = Vec::with_capacity(trimmed.len() + 1 + payload.len());
    if !trimmed.is_empty() {
        frame.extend_from_slice(trimmed.as_bytes());
        frame.push(b'\n');
    }
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn remaining_budget(deadline: Instant) -> UciResult<Duration> {
    let now = Instant::now();
    if now >= deadline {
        Err(UciError::Timeout)
    } else {
        Ok(deadline - now)
    }
}

impl Session {
    /// Send a command with binary payload, bounded by `timeout`
    ///
    /// The frame either fully flushes within the deadline or the call
    /// fails with `Timeout` and the session returns to Idle; partial
    /// delivery is a transport-layer concern not exposed here. A
    /// non-timeout I/O failure marks the session broken and every later
    /// call fails fast with `ChannelNotOpened` until close and reopen.
    pub async fn write(&self, command: &str, payload: &[u8], timeout: Duration) -> UciResult<()> {
        self.ensure_usable()?;
        let mut inner = self.acquire()?;
        let deadline = Instant::now() + effective_timeout(timeout);
        self.write_locked(&mut inner, command, payload, deadline)
            .await
    }

    /// `write` with an empty payload
    pub async fn write_simple(&self, command: &str, timeout: Duration) -> UciResult<()> {
        self.write(command, &[], timeout).await
    }

    /// Render a formatted command, then send it
    ///
    /// Formatting failures surface as `InvalidCommandFormat` before any
    /// I/O is attempted.
    pub fn format_write<'a>(
        &'a self,
        timeout: Duration,
        args: fmt::Arguments<'_>,
    ) -> impl Future<Output = UciResult<()>> + Send + 'a {
        // Render eagerly; `fmt::Arguments` must not cross an await point.
        let rendered = render_command(args);
        async move {
            let command = rendered?;
            self.write(&command, &[], timeout).await
        }
    }

    /// Send a command carrying two numeric parameters
    pub async fn send_command(
        &self,
        command: &str,
        param1: u32,
        param2: u32,
        timeout: Duration,
    ) -> UciResult<()> {
        let rendered = format!("{command} {param1},{param2}");
        self.write(&rendered, &[], timeout).await
    }

    /// Issue an optional command, then receive exactly `expected_len`
    /// reply bytes
    ///
    /// With a non-empty command the write phase runs first and the read
    /// phase gets only the remaining budget, never more.
    pub async fn read(
        &self,
        command: &str,
        expected_len: usize,
        timeout: Duration,
    ) -> UciResult<Bytes> {
        self.ensure_usable()?;
        let mut inner = self.acquire()?;
        let deadline = Instant::now() + effective_timeout(timeout);
        if !command.is_empty() {
            self.write_locked(&mut inner, command, &[], deadline).await?;
        }
        self.read_locked(&mut inner, expected_len, deadline).await
    }

    /// Combined write-then-read round trip under one shared budget
    pub async fn query(&self, request: &CommandRequest) -> UciResult<Bytes> {
        self.ensure_usable()?;
        let mut inner = self.acquire()?;
        let deadline = Instant::now() + request.budget();
        let payload = request.extra_data.as_deref().unwrap_or(&[]);
        self.write_locked(&mut inner, &request.command, payload, deadline)
            .await?;
        self.read_locked(&mut inner, request.expected_len, deadline)
            .await
    }

    pub(crate) async fn write_locked(
        &self,
        inner: &mut SessionInner,
        command: &str,
        payload: &[u8],
        deadline: Instant,
    ) -> UciResult<()> {
        let frame = build_frame(command, payload)?;
        inner.state = DispatchState::Sending;

        let result = async {
            let budget = remaining_budget(deadline)?;
            inner.transport.set_timeout(Some(budget)).await?;
            inner.transport.send_all(&frame).await?;
            inner.transport.flush().await
        }
        .await;

        inner.state = DispatchState::Idle;
        match result {
            Ok(()) => Ok(()),
            Err(UciError::Timeout) => Err(UciError::Timeout),
            Err(e) => {
                log::warn!("Send failed on session {}: {e}", self.handle());
                self.mark_broken();
                Err(e)
            }
        }
    }

    async fn read_locked(
        &self,
        inner: &mut SessionInner,
        expected_len: usize,
        deadline: Instant,
    ) -> UciResult<Bytes> {
        if expected_len == 0 {
            return Ok(Bytes::new());
        }
        inner.state = DispatchState::AwaitingReply;

        let mut buf = vec![0u8; expected_len];
        let mut filled = 0usize;
        let outcome = loop {
            let budget = match remaining_budget(deadline) {
                Ok(b) => b,
                Err(e) => break Err(e),
            };
            if let Err(e) = inner.transport.set_timeout(Some(budget)).await {
                break Err(e);
            }
            match inner.transport.recv(&mut buf[filled..]).await {
                Ok(0) => {
                    // Remote completed early; nothing more is forthcoming.
                    self.mark_broken();
                    break if filled == 0 {
                        Err(UciError::Connection(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "channel closed before any reply data",
                        )))
                    } else {
                        Err(UciError::DataLengthMismatch {
                            expected: expected_len,
                            actual: filled,
                        })
                    };
                }
                Ok(n) => {
                    filled += n;
                    if filled == expected_len {
                        break Ok(Bytes::from(buf));
                    }
                }
                Err(UciError::Timeout) => break Err(UciError::Timeout),
                Err(e) => {
                    log::warn!("Receive failed on session {}: {e}", self.handle());
                    self.mark_broken();
                    break Err(e);
                }
            }
        };

        inner.state = DispatchState::Idle;
        outcome
    }

    /// Receive until the device goes quiet or closes; used by transfers
    /// with no known reply length. Requires at least one byte.
    pub(crate) async fn drain_locked(
        &self,
        inner: &mut SessionInner,
        deadline: Instant,
    ) -> UciResult<Vec<u8>> {
        // Once data has started flowing, this much silence ends the stream.
        const QUIET_WINDOW: Duration = Duration::from_millis(200);

        inner.state = DispatchState::AwaitingReply;
        let mut data = Vec::new();
        let mut chunk = [0u8; 4096];
        let outcome = loop {
            let budget = match remaining_budget(deadline) {
                Ok(b) if !data.is_empty() => b.min(QUIET_WINDOW),
                Ok(b) => b,
                Err(_) if !data.is_empty() => break Ok(std::mem::take(&mut data)),
                Err(e) => break Err(e),
            };
            if let Err(e) = inner.transport.set_timeout(Some(budget)).await {
                break Err(e);
            }
            match inner.transport.recv(&mut chunk).await {
                Ok(0) => {
                    self.mark_broken();
                    break if data.is_empty() {
                        Err(UciError::NoDataIncoming)
                    } else {
                        Ok(std::mem::take(&mut data))
                    };
                }
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(UciError::Timeout) => {
                    break if data.is_empty() {
                        Err(UciError::NoDataIncoming)
                    } else {
                        Ok(std::mem::take(&mut data))
                    };
                }
                Err(e) => {
                    self.mark_broken();
                    break Err(e);
                }
            }
        };

        inner.state = DispatchState::Idle;
        outcome
    }
}

/// Render `format_args!` output into a single command string
pub fn render_command(args: fmt::Arguments<'_>) -> UciResult<String> {
    use fmt::Write;
    let mut rendered = String::new();
    rendered
        .write_fmt(args)
        .map_err(|e| UciError::InvalidCommandFormat(e.to_string()))?;
    Ok(rendered)
}
