// ============================================================================
// filestream Library
// ============================================================================

pub mod backend;
pub mod config;
pub mod core;
pub mod emulation;
pub mod native;
pub mod resolver;
pub mod session;
pub mod stream;

// Re-export main types for convenience
pub use crate::core::{
    DesiredAccess, FilePath, OpenFlags, OpenMode, RawHandle, RecordId, Result, StreamError,
    StreamRequest, TransactionContext,
};

pub use backend::{ContextRow, StreamingBackend};
pub use config::{BlobLocator, StreamConfig};
pub use native::{HandleAcquirer, StreamingApi};
pub use resolver::TransactionContextResolver;
pub use session::FileStreamSession;
pub use stream::{BlobStream, StreamAdapter};
