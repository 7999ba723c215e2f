//! In-process emulation of the database side of the streaming contract.
//!
//! [`EmulatedServer`] stands in for a streaming-enabled database the way an
//! in-memory engine stands in for a SQL server: it hands out per-transaction
//! tokens, vendor-escaped native paths over a temporary backing store, and a
//! native API whose handles die with the transaction that opened them.
//! It exists for development and for exercising the streaming path end to
//! end; it is not a general file store.
//!
//! Limitations: only the default options word (0) is accepted by `open`, and
//! append positioning is not emulated.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::debug;
use tempfile::TempDir;
use uuid::Uuid;

use crate::backend::{ContextRow, StreamingBackend};
use crate::config::BlobLocator;
use crate::core::{DesiredAccess, FilePath, RawHandle, RecordId, Result, StreamError};
use crate::native::StreamingApi;

struct EmulatedHandle {
    file: File,
    tx_id: u64,
}

struct Inner {
    // Kept alive for the lifetime of the server; holds every backing file.
    _root: TempDir,
    root_path: PathBuf,
    /// normalized native path -> backing file
    blobs: HashMap<String, PathBuf>,
    /// (table, record) -> vendor-escaped path as the database would return it
    rows: HashMap<(String, RecordId), String>,
    /// tokens of transactions that are still open
    active_tokens: HashMap<Vec<u8>, u64>,
    handles: HashMap<isize, EmulatedHandle>,
    /// pre-write content snapshots, restored on rollback
    backups: HashMap<u64, Vec<(PathBuf, Vec<u8>)>>,
    journal: Vec<String>,
    open_calls: u64,
    next_handle: isize,
    next_tx: u64,
}

impl Inner {
    fn finish_transaction(&mut self, tx_id: u64, token: &[u8], rollback: bool) {
        self.active_tokens.remove(token);
        // Handles acquired under this transaction are invalid from here on.
        self.handles.retain(|_, handle| handle.tx_id != tx_id);
        if let Some(backups) = self.backups.remove(&tx_id) {
            if rollback {
                for (path, content) in backups {
                    let _ = fs::write(path, content);
                }
            }
        }
        self.journal
            .push(if rollback { "rollback" } else { "commit" }.to_string());
    }
}

/// Emulated streaming-enabled database server.
///
/// Create records with [`create_record`](Self::create_record), connect
/// backends with [`connect`](Self::connect) and install
/// [`streaming_api`](Self::streaming_api) as the native binding.
pub struct EmulatedServer {
    inner: Arc<Mutex<Inner>>,
}

impl EmulatedServer {
    pub fn new() -> Result<Self> {
        let root = TempDir::new()?;
        let root_path = root.path().to_path_buf();
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                _root: root,
                root_path,
                blobs: HashMap::new(),
                rows: HashMap::new(),
                active_tokens: HashMap::new(),
                handles: HashMap::new(),
                backups: HashMap::new(),
                journal: Vec::new(),
                open_calls: 0,
                next_handle: 1,
                next_tx: 1,
            })),
        })
    }

    /// Insert a row with an empty blob for `id`.
    pub fn create_record(&self, table: &str, id: RecordId) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let dir = inner.root_path.join(table);
        fs::create_dir_all(&dir)?;
        let backing = dir.join(format!("{}.blob", id));
        fs::write(&backing, b"")?;

        let vendor = format!("EMULATED\\\\{}\\\\{}", table, id);
        let normalized = FilePath::from_vendor(&vendor).as_str().to_string();
        inner.blobs.insert(normalized, backing);
        inner.rows.insert((table.to_string(), id), vendor);
        debug!("emulated record '{}' created in '{}'", id, table);
        Ok(())
    }

    /// A fresh backend connection with no transaction open.
    pub fn connect(&self) -> EmulatedConnection {
        EmulatedConnection {
            inner: Arc::clone(&self.inner),
            tx: None,
        }
    }

    /// The native streaming API backed by this server's store.
    pub fn streaming_api(&self) -> Arc<dyn StreamingApi> {
        Arc::new(EmulatedApi {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Current blob content, read straight from the backing store.
    pub fn content(&self, table: &str, id: RecordId) -> Result<Vec<u8>> {
        let inner = self.inner.lock()?;
        let vendor = inner
            .rows
            .get(&(table.to_string(), id))
            .ok_or(StreamError::NotFound(id))?;
        let normalized = FilePath::from_vendor(vendor).as_str().to_string();
        let backing = inner
            .blobs
            .get(&normalized)
            .ok_or(StreamError::NotFound(id))?;
        Ok(fs::read(backing)?)
    }

    /// Number of native open calls the server has seen.
    pub fn open_calls(&self) -> u64 {
        self.inner.lock().map(|inner| inner.open_calls).unwrap_or(0)
    }

    /// Handles currently open against the store.
    pub fn open_handle_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.handles.len())
            .unwrap_or(0)
    }

    /// Ordered trace of begin/query/open/close/commit/rollback operations.
    pub fn journal(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.journal.clone())
            .unwrap_or_default()
    }
}

/// One backend connection to an [`EmulatedServer`].
pub struct EmulatedConnection {
    inner: Arc<Mutex<Inner>>,
    tx: Option<(u64, Vec<u8>)>,
}

impl StreamingBackend for EmulatedConnection {
    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(StreamError::Backend("Transaction already active".into()));
        }
        let mut inner = self.inner.lock()?;
        let tx_id = inner.next_tx;
        inner.next_tx += 1;
        let token = Uuid::new_v4().into_bytes().to_vec();
        inner.active_tokens.insert(token.clone(), tx_id);
        inner.journal.push("begin".to_string());
        self.tx = Some((tx_id, token));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let (tx_id, token) = self
            .tx
            .take()
            .ok_or_else(|| StreamError::Backend("No active transaction".into()))?;
        let mut inner = self.inner.lock()?;
        inner.finish_transaction(tx_id, &token, false);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let (tx_id, token) = self
            .tx
            .take()
            .ok_or_else(|| StreamError::Backend("No active transaction".into()))?;
        let mut inner = self.inner.lock()?;
        inner.finish_transaction(tx_id, &token, true);
        Ok(())
    }

    fn fetch_streaming_context(
        &mut self,
        locator: &BlobLocator,
        id: RecordId,
    ) -> Result<Option<ContextRow>> {
        let (_, token) = self
            .tx
            .as_ref()
            .ok_or(StreamError::NoActiveTransaction)?;
        let mut inner = self.inner.lock()?;
        inner.journal.push("query".to_string());
        Ok(inner
            .rows
            .get(&(locator.table.clone(), id))
            .map(|vendor| ContextRow {
                path: vendor.clone(),
                context: token.clone(),
            }))
    }
}

impl Drop for EmulatedConnection {
    fn drop(&mut self) {
        // A connection dropped mid-transaction rolls it back.
        if self.tx.is_some() {
            let _ = self.rollback();
        }
    }
}

struct EmulatedApi {
    inner: Arc<Mutex<Inner>>,
}

impl StreamingApi for EmulatedApi {
    fn open(
        &self,
        path: &str,
        access: DesiredAccess,
        options: u32,
        context: &[u8],
        _timeout_ms: u32,
    ) -> RawHandle {
        let Ok(mut inner) = self.inner.lock() else {
            return RawHandle::INVALID;
        };
        inner.open_calls += 1;
        inner.journal.push("open".to_string());

        // Only the default options word is emulated.
        if options != 0 {
            return RawHandle::INVALID;
        }
        let Some(&tx_id) = inner.active_tokens.get(context) else {
            return RawHandle::INVALID;
        };
        let Some(backing) = inner.blobs.get(path).cloned() else {
            return RawHandle::INVALID;
        };

        if access != DesiredAccess::Read {
            let previous = fs::read(&backing).unwrap_or_default();
            let saved = inner.backups.entry(tx_id).or_default();
            if !saved.iter().any(|(saved_path, _)| *saved_path == backing) {
                saved.push((backing.clone(), previous));
            }
        }

        let mut open_options = OpenOptions::new();
        match access {
            DesiredAccess::Read => open_options.read(true),
            DesiredAccess::Write => open_options.write(true).truncate(true),
            DesiredAccess::ReadWrite => open_options.read(true).write(true),
        };
        let Ok(file) = open_options.open(&backing) else {
            return RawHandle::INVALID;
        };

        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.handles.insert(handle, EmulatedHandle { file, tx_id });
        RawHandle::new(handle)
    }

    fn read(&self, handle: RawHandle, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("poisoned emulation state"))?;
        let entry = inner
            .handles
            .get_mut(&handle.value())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown native handle"))?;
        entry.file.read(buf)
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("poisoned emulation state"))?;
        let entry = inner
            .handles
            .get_mut(&handle.value())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown native handle"))?;
        entry.file.write(buf)
    }

    fn close(&self, handle: RawHandle) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("poisoned emulation state"))?;
        inner
            .handles
            .remove(&handle.value())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown native handle"))?;
        inner.journal.push("close".to_string());
        Ok(())
    }
}
