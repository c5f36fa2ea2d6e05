use std::fmt;
use std::io;

/// Unified error type for the storage engine.
#[derive(Debug)]
pub enum Error {
    /// IO error from disk operations.
    Io(io::Error),
    /// Data corruption detected (CRC mismatch, bad format, etc).
    Corruption(String),
    /// Disk full during flush or compaction. The attempt was aborted and no
    /// partial file is visible; the operation can be retried later.
    Capacity(String),
    /// Unexpected end of file/data.
    Eof,
    /// Operation attempted after the engine was closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Corruption(msg) => write!(f, "Corruption: {msg}"),
            Error::Capacity(msg) => write!(f, "Out of capacity: {msg}"),
            Error::Eof => write!(f, "Unexpected end of file"),
            Error::Closed => write!(f, "Engine is closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        // Disk-full is its own category: it is not a durability bug, the
        // engine keeps serving from existing files and retries later.
        if e.raw_os_error() == Some(28) {
            return Error::Capacity(e.to_string());
        }
        Error::Io(e)
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
