pub mod error;
pub mod types;

pub use error::{Result, StreamError};
pub use types::{
    DesiredAccess, FilePath, OpenFlags, OpenMode, RawHandle, RecordId, StreamRequest,
    TransactionContext,
};
