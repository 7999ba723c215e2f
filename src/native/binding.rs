use std::io;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use log::debug;

use crate::core::{DesiredAccess, RawHandle, Result, StreamError};

/// Native streaming library contract.
///
/// `open` mirrors the vendor entry point: path, desired access, an options
/// word, the raw transaction token (its length is implied by the slice) and
/// a timeout in milliseconds. It returns [`RawHandle::INVALID`] on failure;
/// the vendor call does not distinguish causes. The remaining operations are
/// the standard byte-level calls on an open handle.
pub trait StreamingApi: Send + Sync {
    fn open(
        &self,
        path: &str,
        access: DesiredAccess,
        options: u32,
        context: &[u8],
        timeout_ms: u32,
    ) -> RawHandle;

    fn read(&self, handle: RawHandle, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, handle: RawHandle, buf: &[u8]) -> io::Result<usize>;

    fn close(&self, handle: RawHandle) -> io::Result<()>;
}

lazy_static! {
    static ref BINDING: RwLock<Option<Arc<dyn StreamingApi>>> = RwLock::new(None);
}

/// Install the process-wide native binding.
///
/// Must happen before the first stream is opened. Installing again replaces
/// the previous binding; streams already open keep the binding they were
/// opened with.
pub fn install(api: Arc<dyn StreamingApi>) -> Result<()> {
    let mut slot = BINDING.write()?;
    *slot = Some(api);
    debug!("native streaming binding installed");
    Ok(())
}

/// Remove the installed binding.
///
/// Only valid once every stream is closed; subsequent opens fail with
/// [`StreamError::BindingUnavailable`] until [`install`] runs again.
pub fn teardown() -> Result<()> {
    let mut slot = BINDING.write()?;
    *slot = None;
    debug!("native streaming binding removed");
    Ok(())
}

pub fn installed() -> bool {
    BINDING.read().map(|slot| slot.is_some()).unwrap_or(false)
}

/// The currently installed binding.
pub fn global() -> Result<Arc<dyn StreamingApi>> {
    let slot = BINDING.read()?;
    slot.clone().ok_or(StreamError::BindingUnavailable)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // The binding slot is process-wide; serialize the tests that touch it.
    static GUARD: Mutex<()> = Mutex::new(());

    struct NullApi;

    impl StreamingApi for NullApi {
        fn open(&self, _: &str, _: DesiredAccess, _: u32, _: &[u8], _: u32) -> RawHandle {
            RawHandle::INVALID
        }

        fn read(&self, _: RawHandle, _: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn write(&self, _: RawHandle, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn close(&self, _: RawHandle) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn global_fails_before_install_and_after_teardown() {
        let _guard = GUARD.lock().unwrap();

        teardown().unwrap();
        assert!(matches!(
            global().map(|_| ()),
            Err(StreamError::BindingUnavailable)
        ));

        install(Arc::new(NullApi)).unwrap();
        assert!(installed());
        assert!(global().is_ok());

        teardown().unwrap();
        assert!(!installed());
        assert!(matches!(
            global().map(|_| ()),
            Err(StreamError::BindingUnavailable)
        ));
    }

    #[test]
    fn install_replaces_previous_binding() {
        let _guard = GUARD.lock().unwrap();

        install(Arc::new(NullApi)).unwrap();
        install(Arc::new(NullApi)).unwrap();
        assert!(installed());
        teardown().unwrap();
    }
}
