use thiserror::Error;

use super::types::RecordId;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("No row found for record '{0}'")]
    NotFound(RecordId),

    #[error("Streaming context requires an active transaction")]
    NoActiveTransaction,

    #[error("Native streaming open failed: {0}")]
    HandleAcquisition(String),

    #[error("Cannot adapt an invalid native handle")]
    InvalidHandle,

    #[error("A stream is already open on this session")]
    AlreadyOpen,

    #[error("Record has no persisted identifier; save it before streaming")]
    NotPersisted,

    #[error("Stream is closed")]
    StreamClosed,

    #[error("Invalid open mode: {0}")]
    InvalidMode(String),

    #[error("Native streaming binding is not installed")]
    BindingUnavailable,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

impl<T> From<std::sync::PoisonError<T>> for StreamError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
