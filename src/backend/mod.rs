use crate::config::BlobLocator;
use crate::core::{RecordId, Result};

/// One row of the streaming-context query: the vendor-escaped native path
/// and the raw transaction token, exactly as the database returned them.
#[derive(Debug, Clone)]
pub struct ContextRow {
    pub path: String,
    pub context: Vec<u8>,
}

/// Database collaborator trait - allows pluggable query/transaction backends.
///
/// An implementation wraps whatever driver reaches the database. The
/// streaming path needs only transaction control and a single read query,
/// the one produced by [`BlobLocator::context_query`].
pub trait StreamingBackend {
    /// Whether a transaction is currently active on this connection
    fn in_transaction(&self) -> bool;

    /// Begin a transaction
    fn begin(&mut self) -> Result<()>;

    /// Commit the active transaction
    fn commit(&mut self) -> Result<()>;

    /// Roll back the active transaction
    fn rollback(&mut self) -> Result<()>;

    /// Fetch the native path and transaction token for one record.
    ///
    /// Returns `Ok(None)` when no row matches the identifier. Must be called
    /// inside an active transaction; the token it returns dies with that
    /// transaction.
    fn fetch_streaming_context(
        &mut self,
        locator: &BlobLocator,
        id: RecordId,
    ) -> Result<Option<ContextRow>>;
}
