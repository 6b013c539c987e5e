//! Error types for the storage core.

use std::path::PathBuf;

use thiserror::Error;

use crate::common::config::PageId;

/// Result type alias using [`BufferPoolError`].
pub type Result<T> = std::result::Result<T, BufferPoolError>;

/// Errors raised by the Disk Manager and Buffer Pool Manager.
///
/// `PoolExhausted` and `UnpinUnderflow` are deliberately absent
/// here: pool exhaustion is surfaced as `Option::None`/`bool` return values,
/// not an error, and unpin underflow is a caller bug detected with
/// `debug_assert!` rather than propagated.
#[derive(Debug, Error)]
pub enum BufferPoolError {
    /// `create_file` was called on a path that already exists.
    #[error("file already exists: {0}")]
    FileExists(PathBuf),

    /// `open_file`/`destroy_file` was called on a path that doesn't exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// An operation referenced a `file_id` that has no open handle.
    #[error("file not open: {0}")]
    FileNotOpen(crate::common::config::FileId),

    /// `destroy_file` was called on a path that is currently open.
    #[error("file still open: {0}")]
    FileStillOpen(PathBuf),

    /// A read returned fewer bytes than requested.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// A write wrote fewer bytes than requested.
    #[error("short write: expected {expected} bytes, got {actual}")]
    ShortWrite { expected: usize, actual: usize },

    /// `fetch_page` was asked for a page number known to be past the
    /// allocated range of an open file.
    #[error("invalid page id: {0}")]
    InvalidPageId(PageId),

    /// Underlying OS I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
