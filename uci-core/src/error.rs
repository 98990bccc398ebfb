//! Error taxonomy and status-code mapping for UCI operations
//!
//! Every failure in the engine is one of the `UciError` variants below.
//! Each variant maps to a fixed negative status code; success is `0`.
//! Codes are grouped into categories whose bases sit 20 apart, and count
//! upward inside a category, so a category can grow without renumbering
//! the others.

use std::path::PathBuf;
use thiserror::Error;

/// Status value returned for a successful operation.
pub const UCI_SUCCESS: i32 = 0;

/// Base of the error code space; all real errors are at or below this.
pub const UCI_ERR: i32 = -1000;

/// Main error type for UCI operations
#[derive(Error, Debug)]
pub enum UciError {
    // ---- session / general ----
    #[error("Engine resource initialization failed: {0}")]
    InitResource(String),

    #[error("Invalid or unknown session handle")]
    InvalidSession,

    #[error("Timeout")]
    Timeout,

    #[error("Operation failed: {0}")]
    Failed(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Session busy: another command is in flight")]
    Busy,

    #[error("Underlying subsystem exception: {0}")]
    Subsystem(String),

    #[error("Channel not opened")]
    ChannelNotOpened,

    // ---- connection ----
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Connection could not be established: {0}")]
    NotEstablished(String),

    #[error("Connection broken: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Unsupported transport kind: {0}")]
    UnsupportedTransport(String),

    // ---- device ----
    #[error("No matching device found")]
    DeviceNotFound,

    #[error("Device unsupported")]
    DeviceUnsupported,

    #[error("Device must be discovered before use")]
    DiscoverFirst,

    #[error("Device descriptor mismatch")]
    DeviceMismatch,

    // ---- command ----
    #[error("Invalid command string format: {0}")]
    InvalidCommandFormat(String),

    #[error("Only a single command per request is supported")]
    SingleCommandOnly,

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Command send failed: {0}")]
    SendFailed(String),

    #[error("Malformed protocol frame: {0}")]
    InvalidProtocolFrame(String),

    #[error("No valid reply data found")]
    NoValidReply,

    #[error("Device reported an error: {0}")]
    DeviceError(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    // ---- argument ----
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Output buffer too small: need {needed}, capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    #[error("File name too long ({0} chars)")]
    FileNameTooLong(usize),

    #[error("Data length mismatch: expected {expected}, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },

    // ---- data ----
    #[error("Data overflow")]
    DataOverflow,

    #[error("Data out of range")]
    DataOutOfRange,

    #[error("Insufficient data read: expected {expected}, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Data integrity check failed")]
    IntegrityCheckFailed,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Compression failed")]
    CompressFailed,

    #[error("Decompression failed")]
    DecompressFailed,

    #[error("Data transfer error: {0}")]
    TransferError(String),

    #[error("Data transfer broken")]
    TransferBroken,

    #[error("No data arrived from the device")]
    NoDataIncoming,

    // ---- file ----
    #[error("File access denied: {0}")]
    FileAccessDenied(PathBuf),

    #[error("File operation failed: {0}")]
    FileGeneric(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Bad file path: {0}")]
    FileBadPath(PathBuf),

    #[error("Too many open files")]
    FileTooManyOpen,

    #[error("Invalid file handle")]
    FileInvalidHandle,

    #[error("Disk full")]
    FileDiskFull,

    #[error("End of file")]
    FileEndOfFile,

    #[error("Saving file to disk failed: {0}")]
    FileSaveFailed(PathBuf),

    #[error("File path length out of range ({0} chars)")]
    FilePathLengthOutOfRange(usize),
}

impl UciError {
    /// Map the error to its flat numeric status code.
    ///
    /// All codes are negative; categories occupy disjoint ranges mirroring
    /// the classic UCI status layout (session −1020…, connection −1040…,
    /// device −1060…, command −1080…, argument −1100…, data −1120…,
    /// file −1140…).
    pub fn status(&self) -> i32 {
        use UciError::*;
        match self {
            InitResource(_) => UCI_ERR - 20,
            InvalidSession => UCI_ERR - 19,
            Timeout => UCI_ERR - 18,
            Failed(_) => UCI_ERR - 17,
            Unsupported(_) => UCI_ERR - 16,
            OutOfMemory => UCI_ERR - 15,
            Busy => UCI_ERR - 14,
            Subsystem(_) => UCI_ERR - 13,
            ChannelNotOpened => UCI_ERR - 12,

            InvalidAddress(_) => UCI_ERR - 40,
            NotEstablished(_) => UCI_ERR - 39,
            Connection(_) => UCI_ERR - 38,
            UnsupportedTransport(_) => UCI_ERR - 37,

            DeviceNotFound => UCI_ERR - 60,
            DeviceUnsupported => UCI_ERR - 59,
            DiscoverFirst => UCI_ERR - 58,
            DeviceMismatch => UCI_ERR - 57,

            InvalidCommandFormat(_) => UCI_ERR - 80,
            SingleCommandOnly => UCI_ERR - 79,
            UnsupportedCommand(_) => UCI_ERR - 78,
            SendFailed(_) => UCI_ERR - 77,
            InvalidProtocolFrame(_) => UCI_ERR - 76,
            NoValidReply => UCI_ERR - 75,
            DeviceError(_) => UCI_ERR - 74,
            InvalidExpression(_) => UCI_ERR - 73,

            InvalidArgument(_) => UCI_ERR - 100,
            BufferTooSmall { .. } => UCI_ERR - 99,
            FileNameTooLong(_) => UCI_ERR - 98,
            DataLengthMismatch { .. } => UCI_ERR - 97,

            DataOverflow => UCI_ERR - 120,
            DataOutOfRange => UCI_ERR - 119,
            ShortRead { .. } => UCI_ERR - 118,
            IntegrityCheckFailed => UCI_ERR - 117,
            InvalidData(_) => UCI_ERR - 116,
            CompressFailed => UCI_ERR - 115,
            DecompressFailed => UCI_ERR - 114,
            TransferError(_) => UCI_ERR - 113,
            TransferBroken => UCI_ERR - 112,
            NoDataIncoming => UCI_ERR - 111,

            FileAccessDenied(_) => UCI_ERR - 140,
            FileGeneric(_) => UCI_ERR - 139,
            FileNotFound(_) => UCI_ERR - 138,
            FileBadPath(_) => UCI_ERR - 137,
            FileTooManyOpen => UCI_ERR - 136,
            FileInvalidHandle => UCI_ERR - 135,
            FileDiskFull => UCI_ERR - 134,
            FileEndOfFile => UCI_ERR - 133,
            FileSaveFailed(_) => UCI_ERR - 132,
            FilePathLengthOutOfRange(_) => UCI_ERR - 131,
        }
    }

    /// True for timeout failures, which are retryable by the caller.
    pub fn is_timeout(&self) -> bool {
        matches!(self, UciError::Timeout)
    }

    /// Map an I/O error from a file collaborator into the file category.
    ///
    /// Transport-level I/O errors go through the `Connection` variant
    /// instead; this mapping is only for filesystem access.
    pub fn from_file_io(err: std::io::Error, path: &std::path::Path) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => UciError::FileNotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => UciError::FileAccessDenied(path.to_path_buf()),
            ErrorKind::InvalidInput => UciError::FileBadPath(path.to_path_buf()),
            ErrorKind::StorageFull => UciError::FileDiskFull,
            ErrorKind::UnexpectedEof => UciError::FileEndOfFile,
            _ => UciError::FileGeneric(err.to_string()),
        }
    }
}

/// Result type alias for UCI operations
pub type UciResult<T> = Result<T, UciError>;

/// Flatten a result into the numeric status convention (`0` = success,
/// negative = the error's status code).
pub fn status_of<T>(result: &UciResult<T>) -> i32 {
    match result {
        Ok(_) => UCI_SUCCESS,
        Err(e) => e.status(),
    }
}
