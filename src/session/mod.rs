use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;
use tracing::{Level, event, info_span};

use crate::backend::StreamingBackend;
use crate::config::{BlobLocator, StreamConfig};
use crate::core::{OpenMode, RecordId, Result, StreamError, StreamRequest};
use crate::native::{HandleAcquirer, binding};
use crate::resolver::TransactionContextResolver;
use crate::stream::{BlobStream, StreamAdapter};

/// Scoped streaming access to one record's blob column.
///
/// A session is permanently bound to the identifier value it was created
/// with and composes the whole streaming path: resolve the transaction
/// context, acquire the native handle, adapt it into a stream, and release
/// the handle on every exit path before the transaction boundary is
/// resolved.
///
/// Sessions are cheap to construct and cheap to clone; clones refer to the
/// same descriptor, so the one-open-stream rule spans all of them. Caching a
/// session per (record, column) pair and reusing it across open/close cycles
/// is the intended pattern.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use filestream::emulation::EmulatedServer;
/// use filestream::{BlobLocator, FileStreamSession, RecordId, native::binding};
///
/// # fn main() -> filestream::Result<()> {
/// let server = EmulatedServer::new()?;
/// let locator = BlobLocator::new("documents");
/// let id = RecordId::new();
/// server.create_record(&locator.table, id)?;
/// binding::install(server.streaming_api())?;
///
/// let backend = Arc::new(Mutex::new(server.connect()));
/// let session = FileStreamSession::for_record(backend, locator, id);
///
/// session.store_from(&mut &b"hello streaming"[..])?;
/// assert_eq!(session.read_to_vec()?, b"hello streaming");
///
/// binding::teardown()?;
/// # Ok(())
/// # }
/// ```
pub struct FileStreamSession<B: StreamingBackend> {
    backend: Arc<Mutex<B>>,
    locator: BlobLocator,
    config: StreamConfig,
    id: Option<RecordId>,
    open_flag: Arc<AtomicBool>,
}

impl<B: StreamingBackend> FileStreamSession<B> {
    /// Session for a persisted record.
    pub fn for_record(backend: Arc<Mutex<B>>, locator: BlobLocator, id: RecordId) -> Self {
        Self {
            backend,
            locator,
            config: StreamConfig::default(),
            id: Some(id),
            open_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session for a record that has not been saved yet.
    ///
    /// Every open fails with [`StreamError::NotPersisted`] without touching
    /// the native layer; the record must be persisted and a fresh session
    /// created for its identifier.
    pub fn for_unsaved_record(backend: Arc<Mutex<B>>, locator: BlobLocator) -> Self {
        Self {
            backend,
            locator,
            config: StreamConfig::default(),
            id: None,
            open_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the default [`StreamConfig`].
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn locator(&self) -> &BlobLocator {
        &self.locator
    }

    /// Open a stream on the record, run `body` on it, and guarantee the
    /// handle is released before the transaction boundary.
    ///
    /// Joins an already-active transaction on the backend, otherwise begins
    /// one and commits it after the stream closed; a failure in `body` rolls
    /// that transaction back instead. In both cases `close` runs first, so
    /// the native handle never outlives the transaction that issued its
    /// token. A close failure after a body failure is logged and swallowed;
    /// the body's error is the one the caller sees.
    ///
    /// At most one stream may be open per session at any time; a nested or
    /// concurrent open fails with [`StreamError::AlreadyOpen`].
    pub fn with_stream<T, F>(&self, mode: OpenMode, body: F) -> Result<T>
    where
        F: FnOnce(&mut BlobStream) -> Result<T>,
    {
        let id = self.id.ok_or(StreamError::NotPersisted)?;
        self.config.validate().map_err(StreamError::Backend)?;
        let request = StreamRequest::new(id, mode);

        if self
            .open_flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::AlreadyOpen);
        }
        let _open_guard = OpenGuard {
            flag: &self.open_flag,
        };

        let span = info_span!("blob_stream", record = %request.id, mode = %request.mode);
        let _entered = span.enter();

        let mut backend = self.backend.lock()?;
        let owns_transaction = !backend.in_transaction();
        if owns_transaction {
            backend.begin()?;
        }

        match self.run_streamed(&mut backend, &request, body) {
            Ok(value) => {
                if owns_transaction {
                    backend.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if owns_transaction {
                    if let Err(rollback_err) = backend.rollback() {
                        warn!("Rollback after stream failure failed: {}", rollback_err);
                    }
                }
                event!(Level::DEBUG, error = %err, "scoped stream failed");
                Err(err)
            }
        }
    }

    fn run_streamed<T, F>(&self, backend: &mut B, request: &StreamRequest, body: F) -> Result<T>
    where
        F: FnOnce(&mut BlobStream) -> Result<T>,
    {
        let resolver = TransactionContextResolver::new(self.locator.clone());
        let (path, context) = resolver.resolve(backend, request.id)?;

        let api = binding::global()?;
        let acquirer = HandleAcquirer::new(&self.config);
        let handle = acquirer.acquire(
            api.as_ref(),
            &path,
            request.mode.desired_access(),
            &context,
        )?;
        let mut stream = StreamAdapter::wrap(api, handle, request.mode.flags())?;

        let outcome = body(&mut stream);

        // The handle must be gone before commit/rollback; a close failure
        // never replaces an error the body already produced.
        match (outcome, stream.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(body_err), Ok(())) => Err(body_err),
            (Err(body_err), Err(close_err)) => {
                warn!("Closing stream after failure also failed: {}", close_err);
                Err(body_err)
            }
        }
    }

    /// Replace the record's content with everything `source` yields.
    ///
    /// Copies in `copy_buffer_size` chunks through a binary write stream and
    /// returns the number of bytes stored.
    pub fn store_from<R: Read>(&self, source: &mut R) -> Result<u64> {
        let buffer_size = self.config.copy_buffer_size;
        self.with_stream(OpenMode::write().binary(), |stream| {
            let mut chunk = vec![0u8; buffer_size];
            let mut total = 0u64;
            loop {
                let n = source.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                stream.write(&chunk[..n])?;
                total += n as u64;
            }
            Ok(total)
        })
    }

    /// Read the record's entire content through a binary read stream.
    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let buffer_size = self.config.copy_buffer_size;
        self.with_stream(OpenMode::read().binary(), |stream| {
            let mut out = Vec::new();
            let mut chunk = vec![0u8; buffer_size];
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
            }
            Ok(out)
        })
    }
}

impl<B: StreamingBackend> Clone for FileStreamSession<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            locator: self.locator.clone(),
            config: self.config.clone(),
            id: self.id,
            open_flag: Arc::clone(&self.open_flag),
        }
    }
}

/// Clears the one-open-stream marker on every exit path.
struct OpenGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
