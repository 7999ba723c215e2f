use log::debug;

use crate::backend::StreamingBackend;
use crate::config::BlobLocator;
use crate::core::{FilePath, RecordId, Result, StreamError, TransactionContext};

/// Resolves the native path and transaction token for one record.
///
/// Must run inside an active transaction: the token the database hands back
/// is scoped to that transaction, which is why the result is never cached
/// and a fresh resolve happens on every open.
pub struct TransactionContextResolver {
    locator: BlobLocator,
}

impl TransactionContextResolver {
    pub fn new(locator: BlobLocator) -> Self {
        Self { locator }
    }

    /// Issue the single scoped read query and normalize what comes back.
    pub fn resolve<B: StreamingBackend + ?Sized>(
        &self,
        backend: &mut B,
        id: RecordId,
    ) -> Result<(FilePath, TransactionContext)> {
        if !backend.in_transaction() {
            return Err(StreamError::NoActiveTransaction);
        }
        self.locator.validate().map_err(StreamError::Backend)?;

        let row = backend
            .fetch_streaming_context(&self.locator, id)?
            .ok_or(StreamError::NotFound(id))?;

        let path = FilePath::from_vendor(&row.path);
        let context = TransactionContext::new(row.context);
        debug!(
            "resolved streaming context for record '{}' ({} token bytes)",
            id,
            context.len()
        );
        Ok((path, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ContextRow;

    struct FakeBackend {
        in_tx: bool,
        row: Option<ContextRow>,
        fetches: u32,
    }

    impl StreamingBackend for FakeBackend {
        fn in_transaction(&self) -> bool {
            self.in_tx
        }

        fn begin(&mut self) -> Result<()> {
            self.in_tx = true;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.in_tx = false;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.in_tx = false;
            Ok(())
        }

        fn fetch_streaming_context(
            &mut self,
            _locator: &BlobLocator,
            _id: RecordId,
        ) -> Result<Option<ContextRow>> {
            self.fetches += 1;
            Ok(self.row.clone())
        }
    }

    fn resolver() -> TransactionContextResolver {
        TransactionContextResolver::new(BlobLocator::new("documents"))
    }

    #[test]
    fn resolve_outside_transaction_fails_without_querying() {
        let mut backend = FakeBackend {
            in_tx: false,
            row: None,
            fetches: 0,
        };
        let err = resolver()
            .resolve(&mut backend, RecordId::new())
            .unwrap_err();
        assert!(matches!(err, StreamError::NoActiveTransaction));
        assert_eq!(backend.fetches, 0);
    }

    #[test]
    fn missing_row_maps_to_not_found() {
        let mut backend = FakeBackend {
            in_tx: true,
            row: None,
            fetches: 0,
        };
        let id = RecordId::new();
        let err = resolver().resolve(&mut backend, id).unwrap_err();
        assert!(matches!(err, StreamError::NotFound(found) if found == id));
        assert_eq!(backend.fetches, 1);
    }

    #[test]
    fn resolve_normalizes_vendor_path_and_keeps_token() {
        let mut backend = FakeBackend {
            in_tx: true,
            row: Some(ContextRow {
                path: "Server\\\\Blobs\\\\v1\\\\f9".to_string(),
                context: vec![9, 9, 9],
            }),
            fetches: 0,
        };
        let (path, context) = resolver().resolve(&mut backend, RecordId::new()).unwrap();
        assert_eq!(path.as_str(), "\\Server\\Blobs\\v1\\f9");
        assert_eq!(context.as_bytes(), &[9, 9, 9]);
    }

    #[test]
    fn invalid_locator_is_rejected_before_the_query() {
        let resolver = TransactionContextResolver::new(BlobLocator::new("bad table"));
        let mut backend = FakeBackend {
            in_tx: true,
            row: None,
            fetches: 0,
        };
        let err = resolver
            .resolve(&mut backend, RecordId::new())
            .unwrap_err();
        assert!(matches!(err, StreamError::Backend(_)));
        assert_eq!(backend.fetches, 0);
    }
}
