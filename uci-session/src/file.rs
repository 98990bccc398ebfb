//! File-based bulk transfer helpers
//!
//! These wrap the dispatcher paths with filesystem collaborators: a write
//! sourced from a local file, and a read materialized into one. The
//! external contract is all-or-nothing; completion is announced through
//! the notification hub.

use crate::session::Session;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uci_core::{MAX_PATH, UciError, UciResult, effective_timeout};
use uci_notify::NotificationEvent;

fn check_path_len(path: &Path) -> UciResult<()> {
    let len = path.as_os_str().len();
    if len == 0 || len > MAX_PATH {
        return Err(UciError::FileNameTooLong(len));
    }
    Ok(())
}

/// Pick a materialization path that does not clobber an existing file.
///
/// On collision a numeric suffix is appended before the extension:
/// `out.bin` → `out (1).bin`, `out (2).bin`, …
async fn resolve_final_path(requested: &Path) -> UciResult<PathBuf> {
    let exists = |p: PathBuf| async move {
        tokio::fs::try_exists(&p)
            .await
            .map_err(|e| UciError::from_file_io(e, &p))
            .map(|yes| (yes, p))
    };

    let (taken, requested_buf) = exists(requested.to_path_buf()).await?;
    if !taken {
        return Ok(requested_buf);
    }

    let stem = requested
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");
    let ext = requested.extension().and_then(|s| s.to_str());
    let parent = requested.parent().unwrap_or_else(|| Path::new(""));

    for n in 1u32.. {
        let name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = parent.join(name);
        let (taken, candidate) = exists(candidate).await?;
        if !taken {
            return Ok(candidate);
        }
    }
    unreachable!()
}

impl Session {
    /// Send a command whose payload is the full content of a local file
    ///
    /// The file is read completely before any byte hits the wire; a
    /// filesystem failure therefore never leaves a half-sent frame.
    pub async fn write_from_file(
        &self,
        command: &str,
        path: &Path,
        timeout: Duration,
    ) -> UciResult<()> {
        check_path_len(path)?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UciError::from_file_io(e, path))?;
        let total = data.len() as u64;

        self.write(command, &data, timeout).await?;

        log::info!(
            "Session {} sent {total} bytes from {}",
            self.handle(),
            path.display()
        );
        self.hub().post(NotificationEvent::FileTransfer {
            session: self.handle().raw(),
            transferred: total,
            total,
            done: true,
        });
        Ok(())
    }

    /// Issue a command and materialize the reply stream into a file
    ///
    /// The reply is accumulated until the device closes the channel or
    /// goes quiet; at least one byte must arrive (`NoDataIncoming`
    /// otherwise). The final path may differ from `path` when a file of
    /// that name already exists; the materialized path is returned.
    pub async fn read_to_file(
        &self,
        command: &str,
        path: &Path,
        timeout: Duration,
    ) -> UciResult<PathBuf> {
        check_path_len(path)?;
        self.ensure_usable()?;
        let mut inner = self.acquire()?;
        let deadline = Instant::now() + effective_timeout(timeout);

        if !command.is_empty() {
            self.write_locked(&mut inner, command, &[], deadline).await?;
        }
        let data = self.drain_locked(&mut inner, deadline).await?;
        drop(inner);

        let final_path = resolve_final_path(path).await?;
        if final_path.as_os_str().len() > MAX_PATH {
            return Err(UciError::FilePathLengthOutOfRange(
                final_path.as_os_str().len(),
            ));
        }
        tokio::fs::write(&final_path, &data).await.map_err(|e| {
            match UciError::from_file_io(e, &final_path) {
                UciError::FileGeneric(_) => UciError::FileSaveFailed(final_path.clone()),
                other => other,
            }
        })?;

        let total = data.len() as u64;
        log::info!(
            "Session {} stored {total} bytes at {}",
            self.handle(),
            final_path.display()
        );
        self.hub().post(NotificationEvent::FileTransfer {
            session: self.handle().raw(),
            transferred: total,
            total,
            done: true,
        });
        Ok(final_path)
    }
}

// write_locked/drain_locked live in dispatcher.rs; they are crate-private
// seams shared with this module.
