use std::fmt;
use std::os::windows::io::{AsRawHandle, RawHandle};
use winapi::um::handleapi;
use winapi::um::winnt::HANDLE;

/// An owned kernel handle which is closed when dropped.
pub struct Handle {
    raw: HANDLE,
}

impl Handle {
    /// Take ownership of the given raw handle.
    pub(crate) fn from_raw(raw: HANDLE) -> Self {
        Self { raw }
    }
}

impl AsRawHandle for Handle {
    fn as_raw_handle(&self) -> RawHandle {
        self.raw as RawHandle
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("raw", &self.raw).finish()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        unsafe {
            // NB: intentionally ignored.
            let _ = handleapi::CloseHandle(self.raw);
        }
    }
}

// Safety: the handle is just an opaque kernel identifier and every operation
// performed through it goes through the kernel's own synchronization.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}
