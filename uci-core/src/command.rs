//! Command request types shared by the dispatcher and the public surface

use bytes::Bytes;
use std::time::Duration;

/// Default channel timeout applied when a request carries `Duration::ZERO`
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest path accepted for file-transfer targets
pub const MAX_PATH: usize = 260;

/// Resolve a requested timeout against the channel default
///
/// A zero timeout means "use the channel default", never "non-blocking".
pub fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        DEFAULT_TIMEOUT
    } else {
        timeout
    }
}

/// One command round trip: command text, optional extra binary payload
/// sent after the command, the expected reply length, and the time budget
/// shared by the send and receive phases.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Command string, sent newline-terminated
    pub command: String,
    /// Extra binary payload appended after the command, if any
    pub extra_data: Option<Bytes>,
    /// Exact number of reply bytes expected
    pub expected_len: usize,
    /// Total budget; `Duration::ZERO` selects the channel default
    pub timeout: Duration,
}

impl CommandRequest {
    /// Build a query request expecting `expected_len` reply bytes
    pub fn query(command: impl Into<String>, expected_len: usize, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            extra_data: None,
            expected_len,
            timeout,
        }
    }

    /// Attach extra binary payload to be sent after the command
    pub fn with_extra_data(mut self, data: Bytes) -> Self {
        self.extra_data = Some(data);
        self
    }

    /// Time budget with the zero-means-default rule applied
    pub fn budget(&self) -> Duration {
        effective_timeout(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_means_default() {
        let req = CommandRequest::query("*IDN?", 64, Duration::ZERO);
        assert_eq!(req.budget(), DEFAULT_TIMEOUT);

        let req = CommandRequest::query("*IDN?", 64, Duration::from_millis(250));
        assert_eq!(req.budget(), Duration::from_millis(250));
    }

    #[test]
    fn test_extra_data() {
        let req = CommandRequest::query("MEM:DATA", 0, Duration::from_secs(1))
            .with_extra_data(Bytes::from_static(b"\x01\x02"));
        assert_eq!(req.extra_data.as_deref(), Some(&b"\x01\x02"[..]));
    }
}
