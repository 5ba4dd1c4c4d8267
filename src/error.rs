// Error kinds for the PicoDB storage core.
//
// Every fallible operation in `storage` and `io_queue` returns `Result<T>`.
// Initialization failures (`NotInitialized`, `AccessDenied`, `ConfigOutOfRange`)
// are terminal; per-operation failures (`IoError`) are recoverable and leave
// the buffer pool's in-memory state unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration out of range: {0}")]
    ConfigOutOfRange(String),

    #[error("database not initialized at {0}; run `picodb init` first")]
    NotInitialized(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    #[error("buffer pool overflow: all pages in {0} are pinned")]
    BufferPoolOverflow(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
