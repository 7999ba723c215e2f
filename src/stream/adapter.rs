use std::collections::VecDeque;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;

use crate::core::{OpenFlags, RawHandle, Result, StreamError};
use crate::native::StreamingApi;

/// End-of-line sequence used by text-mode translation.
#[cfg(windows)]
const NATIVE_EOL: &[u8] = b"\r\n";
#[cfg(not(windows))]
const NATIVE_EOL: &[u8] = b"\n";

/// Adapts a raw native handle into a [`BlobStream`].
pub struct StreamAdapter;

impl StreamAdapter {
    /// Wrap `handle` with the given flags.
    ///
    /// The stream takes exclusive ownership of the handle; it is closed
    /// exactly once, either by [`BlobStream::close`] or on drop.
    pub fn wrap(
        api: Arc<dyn StreamingApi>,
        handle: RawHandle,
        flags: OpenFlags,
    ) -> Result<BlobStream> {
        if handle.is_invalid() {
            return Err(StreamError::InvalidHandle);
        }
        Ok(BlobStream {
            api,
            handle: Some(handle),
            flags,
            decoder: EolDecoder::default(),
            decoded: VecDeque::new(),
            _single_thread: PhantomData,
        })
    }
}

/// Byte stream over a native streaming handle.
///
/// The handle is bound to the transaction it was acquired in and is not safe
/// to touch from another thread, so the stream is deliberately neither
/// `Send` nor `Sync`.
pub struct BlobStream {
    api: Arc<dyn StreamingApi>,
    handle: Option<RawHandle>,
    flags: OpenFlags,
    decoder: EolDecoder,
    decoded: VecDeque<u8>,
    _single_thread: PhantomData<*const ()>,
}

impl BlobStream {
    fn live_handle(&self) -> Result<RawHandle> {
        self.handle.ok_or(StreamError::StreamClosed)
    }

    fn text_mode(&self) -> bool {
        // Translation only does anything where the platform EOL is CRLF.
        self.flags.contains(OpenFlags::TEXT) && cfg!(windows)
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Read up to `buf.len()` bytes; returns 0 at end of object.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.live_handle()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.text_mode() {
            return Ok(self.api.read(handle, buf)?);
        }

        // Text mode: decode through the carry-over buffer so a CRLF pair
        // split across native reads still collapses.
        while self.decoded.is_empty() {
            let mut chunk = vec![0u8; buf.len()];
            let n = self.api.read(handle, &mut chunk)?;
            if n == 0 {
                self.decoder.finish(&mut self.decoded);
                break;
            }
            self.decoder.decode(&chunk[..n], &mut self.decoded);
        }
        let n = self.decoded.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.decoded.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    /// Write the whole buffer; returns the number of caller bytes consumed.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let handle = self.live_handle()?;
        if self.text_mode() {
            let mut encoded = Vec::with_capacity(buf.len());
            for &b in buf {
                if b == b'\n' {
                    encoded.extend_from_slice(NATIVE_EOL);
                } else {
                    encoded.push(b);
                }
            }
            self.write_all_native(handle, &encoded)?;
            return Ok(buf.len());
        }
        self.write_all_native(handle, buf)?;
        Ok(buf.len())
    }

    fn write_all_native(&self, handle: RawHandle, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.api.write(handle, buf)?;
            if n == 0 {
                return Err(StreamError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "native write made no progress",
                )));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Release the native handle.
    ///
    /// Idempotent: the first call closes, every later call is a no-op. The
    /// scoped session relies on this when its own close races a close the
    /// caller already performed inside the body.
    pub fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                self.api.close(handle)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for BlobStream {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.close() {
                warn!("Closing streaming handle during drop failed: {}", err);
            }
        }
    }
}

fn to_io(err: StreamError) -> io::Error {
    match err {
        StreamError::Io(inner) => inner,
        StreamError::StreamClosed => {
            io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
        }
        other => io::Error::other(other),
    }
}

impl io::Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BlobStream::read(self, buf).map_err(to_io)
    }
}

impl io::Write for BlobStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BlobStream::write(self, buf).map_err(to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Native writes are unbuffered on this side.
        Ok(())
    }
}

/// Collapses platform CRLF pairs to `\n`, carrying a trailing CR between
/// chunks so pairs split across reads still collapse.
#[derive(Default)]
struct EolDecoder {
    pending_cr: bool,
}

impl EolDecoder {
    fn decode(&mut self, input: &[u8], out: &mut VecDeque<u8>) {
        for &b in input {
            if self.pending_cr {
                self.pending_cr = false;
                if b == b'\n' {
                    out.push_back(b'\n');
                    continue;
                }
                out.push_back(b'\r');
            }
            if b == b'\r' {
                self.pending_cr = true;
            } else {
                out.push_back(b);
            }
        }
    }

    fn finish(&mut self, out: &mut VecDeque<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push_back(b'\r');
        }
    }
}
