use crate::errors;
use crate::handle::Handle;
use std::convert::TryFrom as _;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, AsRawSocket, RawHandle};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::um::errhandlingapi;
use winapi::um::handleapi;
use winapi::um::ioapiset;
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::winbase;
use winapi::um::winnt::HANDLE;

/// A single notification dequeued from a [CompletionPort].
///
/// The `overlapped` field is the stable address of the operation that
/// finished, equal to [Overlapped::address][crate::Overlapped::address] of
/// the originating object, and is the key an event loop uses to route the
/// notification to a waiter.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct CompletionStatus {
    /// The completion code of the operation. Zero on success. A non-zero
    /// code still produces a status, not an error, because the operation
    /// itself finished.
    pub error: u32,
    /// The number of bytes transferred.
    pub bytes_transferred: u32,
    /// The completion key the handle was registered under.
    pub key: usize,
    /// The address of the native control block of the finished operation.
    pub overlapped: usize,
}

/// The outcome of one call to [CompletionPort::wait].
#[derive(Debug, Clone, Copy)]
pub enum CompletionPoll {
    /// A completion was dequeued.
    Status(CompletionStatus),
    /// The timeout elapsed without a completion arriving.
    Timeout,
}

/// The handler for a Windows I/O completion port.
///
/// Cloning shares the underlying port, which is closed once the last clone
/// is dropped.
#[derive(Debug, Clone)]
pub struct CompletionPort {
    handle: Arc<Handle>,
}

impl CompletionPort {
    /// Create a new completion port.
    ///
    /// `concurrency` bounds the number of threads the kernel releases
    /// simultaneously from [wait][CompletionPort::wait]. Zero means one per
    /// processor.
    pub fn new(concurrency: u32) -> io::Result<Self> {
        unsafe {
            let handle = ioapiset::CreateIoCompletionPort(
                handleapi::INVALID_HANDLE_VALUE,
                ptr::null_mut(),
                0,
                concurrency,
            );

            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                handle: Arc::new(Handle::from_raw(handle)),
            })
        }
    }

    /// Associate a file or pipe handle with this port under the given
    /// completion key.
    ///
    /// Every overlapped operation started on the handle afterwards notifies
    /// this port when it finishes, carrying `key` in its
    /// [CompletionStatus].
    pub fn associate<H>(&self, handle: &H, key: usize) -> io::Result<()>
    where
        H: AsRawHandle + ?Sized,
    {
        self.associate_raw(handle.as_raw_handle() as HANDLE, key)
    }

    /// Associate a socket with this port under the given completion key.
    pub fn associate_socket<S>(&self, socket: &S, key: usize) -> io::Result<()>
    where
        S: AsRawSocket + ?Sized,
    {
        self.associate_raw(socket.as_raw_socket() as usize as HANDLE, key)
    }

    fn associate_raw(&self, handle: HANDLE, key: usize) -> io::Result<()> {
        let existing = self.handle.as_raw_handle() as HANDLE;

        let port = unsafe { ioapiset::CreateIoCompletionPort(handle, existing, key, 0) };

        if port.is_null() {
            return Err(io::Error::last_os_error());
        }

        // The system hands back the port the handle was attached to.
        debug_assert_eq!(port, existing);
        Ok(())
    }

    /// Post a synthetic completion to the port.
    ///
    /// The notification is indistinguishable from a kernel-produced one and
    /// is what an event loop uses to wake its own
    /// [wait][CompletionPort::wait] from another thread.
    pub fn post(&self, bytes_transferred: u32, key: usize, overlapped: usize) -> io::Result<()> {
        unsafe {
            let result = ioapiset::PostQueuedCompletionStatus(
                self.handle.as_raw_handle() as HANDLE,
                bytes_transferred,
                key,
                overlapped as *mut OVERLAPPED,
            );

            if result == FALSE {
                return Err(io::Error::last_os_error());
            }

            Ok(())
        }
    }

    /// Dequeue the next completion, waiting up to `timeout` for one to
    /// arrive. `None` waits forever.
    ///
    /// A timeout is reported as [CompletionPoll::Timeout], distinct from an
    /// error: the system signals it with a null overlapped pointer and the
    /// wait-timeout code. Any other null-pointer outcome is an error of the
    /// wait itself. A non-null pointer is always a [CompletionStatus], even
    /// when the operation it describes finished with a non-zero code.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<CompletionPoll> {
        let millis = match timeout {
            None => crate::flags::INFINITE,
            Some(timeout) => match DWORD::try_from(timeout.as_millis()) {
                Ok(millis) if millis < crate::flags::INFINITE => millis,
                _ => {
                    return Err(io::Error::new(io::ErrorKind::InvalidInput, "timeout too big"));
                }
            },
        };

        unsafe {
            let mut bytes_transferred = mem::MaybeUninit::<DWORD>::zeroed();
            let mut key = mem::MaybeUninit::<usize>::zeroed();
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

            let result = ioapiset::GetQueuedCompletionStatus(
                self.handle.as_raw_handle() as HANDLE,
                bytes_transferred.as_mut_ptr(),
                key.as_mut_ptr(),
                &mut overlapped,
                millis,
            );

            let error = if result == FALSE {
                errhandlingapi::GetLastError()
            } else {
                errors::ERROR_SUCCESS
            };

            if overlapped.is_null() {
                if error == errors::WAIT_TIMEOUT {
                    return Ok(CompletionPoll::Timeout);
                }

                return Err(errors::os_error(error));
            }

            Ok(CompletionPoll::Status(CompletionStatus {
                error,
                bytes_transferred: bytes_transferred.assume_init(),
                key: key.assume_init(),
                overlapped: overlapped as usize,
            }))
        }
    }
}

impl AsRawHandle for CompletionPort {
    fn as_raw_handle(&self) -> RawHandle {
        self.handle.as_raw_handle()
    }
}

/// Set how the given handle notifies its completion port.
///
/// With [FILE_SKIP_COMPLETION_PORT_ON_SUCCESS][crate::flags] set, operations
/// that complete synchronously with success do not queue a packet and the
/// caller must consume the result in place.
pub fn set_notification_modes<H>(handle: &H, flags: u8) -> io::Result<()>
where
    H: AsRawHandle + ?Sized,
{
    unsafe {
        let result =
            winbase::SetFileCompletionNotificationModes(handle.as_raw_handle() as HANDLE, flags);

        if result == FALSE {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}
