use log::debug;

use super::binding::StreamingApi;
use crate::config::StreamConfig;
use crate::core::{DesiredAccess, FilePath, RawHandle, Result, StreamError, TransactionContext};

/// Requests a native streaming handle for a resolved (path, token) pair.
///
/// A single attempt per call: the native mechanism has no transient-failure
/// semantics, so there is nothing to retry. A stale token, a path from
/// another transaction and a plain refusal all look identical from here,
/// and are reported as one opaque acquisition failure.
pub struct HandleAcquirer {
    options: u32,
    timeout_ms: u32,
}

impl HandleAcquirer {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            options: config.open_options,
            timeout_ms: config.open_timeout_ms,
        }
    }

    pub fn acquire(
        &self,
        api: &dyn StreamingApi,
        path: &FilePath,
        access: DesiredAccess,
        context: &TransactionContext,
    ) -> Result<RawHandle> {
        let handle = api.open(
            path.as_str(),
            access,
            self.options,
            context.as_bytes(),
            self.timeout_ms,
        );
        if handle.is_invalid() {
            return Err(StreamError::HandleAcquisition(format!(
                "invalid handle returned for '{}'",
                path
            )));
        }
        debug!("acquired native handle {} for '{}'", handle.value(), path);
        Ok(handle)
    }
}
