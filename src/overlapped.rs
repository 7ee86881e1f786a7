use crate::errors;
use crate::ext;
use crate::socket::SocketAddress;
use std::cell::UnsafeCell;
use std::cmp;
use std::convert::TryFrom as _;
use std::fmt;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, AsRawSocket, RawHandle};
use std::ptr;
use winapi::ctypes::c_void;
use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::shared::ntstatus::STATUS_PENDING;
use winapi::shared::ws2def::SOCKADDR;
use winapi::shared::ws2ipdef::SOCKADDR_IN6_LH;
use winapi::um::errhandlingapi;
use winapi::um::fileapi;
use winapi::um::handleapi;
use winapi::um::ioapiset;
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::namedpipeapi;
use winapi::um::synchapi;
use winapi::um::winnt::HANDLE;
use winapi::um::winsock2::{self, SOCKET, WSABUF};

/// The state and buffers of the one operation an [Overlapped] may carry.
///
/// Read-style operations own their buffer outright. Write-style operations
/// keep the caller's byte source boxed and alive until the kernel confirms
/// it is done with the memory.
enum OpData {
    /// No operation has been attempted yet.
    Idle,
    /// The start call failed synchronously, nothing is in flight.
    NotStarted,
    /// An in-flight read with its owned destination buffer.
    Read(Vec<u8>),
    /// An in-flight write holding the caller's byte source.
    Write(Box<dyn AsRef<[u8]> + Send>),
    /// An in-flight accept with the address buffer the system fills.
    Accept(Vec<u8>),
    /// An in-flight connect.
    Connect,
    /// An in-flight disconnect.
    Disconnect,
    /// An in-flight named pipe server-side connect.
    ConnectPipe,
}

impl OpData {
    /// Operations whose completion deposits data into a crate-owned buffer.
    /// A broken pipe observed for these is end-of-stream, not an error.
    fn has_read_buffer(&self) -> bool {
        matches!(self, OpData::Read(..) | OpData::Accept(..))
    }

    fn name(&self) -> &'static str {
        match self {
            OpData::Idle => "idle",
            OpData::NotStarted => "not-started",
            OpData::Read(..) => "read",
            OpData::Write(..) => "write",
            OpData::Accept(..) => "accept",
            OpData::Connect => "connect",
            OpData::Disconnect => "disconnect",
            OpData::ConnectPipe => "connect-pipe",
        }
    }
}

/// The successful outcome of an operation, as reported by
/// [Overlapped::result].
#[derive(Debug)]
pub enum OpOutput {
    /// A read-style operation finished. The buffer is truncated to exactly
    /// the bytes the kernel transferred and its ownership moves to the
    /// caller.
    Bytes(Vec<u8>),
    /// A write-style operation transferred this many bytes.
    Transferred(u32),
    /// An accept, connect or disconnect finished.
    Done,
}

impl OpOutput {
    /// The read buffer, if this is the outcome of a read-style operation.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            OpOutput::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The transfer count, if this is the outcome of a write-style
    /// operation.
    pub fn transferred(&self) -> Option<u32> {
        match self {
            OpOutput::Transferred(n) => Some(*n),
            _ => None,
        }
    }
}

#[repr(C)]
struct Inner {
    // The native control block. Must be the first field so that the address
    // handed to the kernel is the address of the allocation.
    raw: UnsafeCell<OVERLAPPED>,
    // The handle the operation was started against.
    handle: HANDLE,
    // The last observed operating system error code.
    error: DWORD,
    data: OpData,
}

/// A single overlapped I/O operation and the resources the kernel needs to
/// complete it.
///
/// The object is created idle, is armed by exactly one of the submission
/// calls, and from then on owns the native control block and buffers of the
/// operation until the completion has been observed through
/// [result][Overlapped::result] or the object is dropped. The address of the
/// control block never changes and doubles as the operation's identity in
/// [CompletionStatus::overlapped][crate::CompletionStatus::overlapped]
/// notifications.
///
/// Dropping the object while the kernel still owns the control block cancels
/// the operation and waits for it to settle first, since releasing the
/// buffers under a live operation would corrupt the process.
pub struct Overlapped {
    inner: Box<Inner>,
}

// Safety: the raw pointers inside are kernel identifiers, not shared memory,
// and all mutation of the interior state goes through exclusive references.
unsafe impl Send for Overlapped {}
unsafe impl Sync for Overlapped {}

impl Overlapped {
    /// Construct an idle operation with a fresh manual-reset, unsignaled
    /// event attached to the control block.
    pub fn new() -> io::Result<Self> {
        let event =
            unsafe { synchapi::CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null_mut()) };

        if event.is_null() {
            return Err(io::Error::last_os_error());
        }

        Ok(Self::with_event(event))
    }

    /// Construct an idle operation around a caller-provided event handle.
    ///
    /// Ownership of the event moves to the operation and it is closed when
    /// the operation is dropped.
    pub fn from_event(event: RawHandle) -> Self {
        Self::with_event(event as HANDLE)
    }

    fn with_event(event: HANDLE) -> Self {
        // Safety: the OVERLAPPED structure is valid when zeroed.
        let mut raw: OVERLAPPED = unsafe { mem::zeroed() };
        raw.hEvent = event;

        Self {
            inner: Box::new(Inner {
                raw: UnsafeCell::new(raw),
                handle: ptr::null_mut(),
                error: 0,
                data: OpData::Idle,
            }),
        }
    }

    /// The stable address of the native control block.
    ///
    /// This is the value completion ports report back in
    /// [CompletionStatus::overlapped][crate::CompletionStatus::overlapped]
    /// and is constant from construction until drop.
    pub fn address(&self) -> usize {
        self.inner.raw.get() as usize
    }

    /// The error code observed by the most recent start or result call.
    pub fn error(&self) -> u32 {
        self.inner.error
    }

    /// The event handle attached to the control block.
    pub fn event(&self) -> RawHandle {
        unsafe { (*self.raw()).hEvent as RawHandle }
    }

    /// Whether an operation is in flight: started successfully and not yet
    /// completed by the kernel.
    pub fn pending(&self) -> bool {
        !self.io_completed() && !matches!(self.inner.data, OpData::NotStarted)
    }

    /// Whether a submission call armed this object with a live operation.
    ///
    /// False both for an idle object and for one whose start call failed,
    /// including a read that observed a broken pipe at submission, which is
    /// reported as success but will never produce a completion.
    pub fn started(&self) -> bool {
        !matches!(self.inner.data, OpData::Idle | OpData::NotStarted)
    }

    fn raw(&self) -> *mut OVERLAPPED {
        self.inner.raw.get()
    }

    fn io_completed(&self) -> bool {
        // The kernel parks STATUS_PENDING in the Internal field for as long
        // as it owns the block.
        unsafe { (*self.raw()).Internal != STATUS_PENDING as usize }
    }

    fn ensure_idle(&self) -> io::Result<()> {
        if let OpData::Idle = self.inner.data {
            return Ok(());
        }

        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "operation already attempted",
        ))
    }

    /// Interpret the status of a start call for an operation without a read
    /// buffer. Success and pending both leave the operation armed.
    fn started_with(&mut self, error: DWORD) -> io::Result<()> {
        self.inner.error = error;

        match error {
            errors::ERROR_SUCCESS | errors::ERROR_IO_PENDING => Ok(()),
            error => {
                self.inner.data = OpData::NotStarted;
                Err(errors::os_error(error))
            }
        }
    }

    /// Interpret the status of a start call for a read-style operation.
    ///
    /// A broken pipe at submission is end-of-stream: the operation is
    /// downgraded to not-started and no error surfaces, with the recorded
    /// error code left for the caller to inspect.
    fn started_with_read(&mut self, error: DWORD) -> io::Result<()> {
        self.inner.error = error;

        match error {
            errors::ERROR_BROKEN_PIPE => {
                self.inner.data = OpData::NotStarted;
                Ok(())
            }
            errors::ERROR_SUCCESS | errors::ERROR_MORE_DATA | errors::ERROR_IO_PENDING => Ok(()),
            error => {
                self.inner.data = OpData::NotStarted;
                Err(errors::os_error(error))
            }
        }
    }

    /// Start an overlapped read of up to `size` bytes from a file or pipe
    /// handle.
    ///
    /// The destination buffer is owned by the operation and sized to at
    /// least one byte so the kernel always has a valid address to write
    /// through, even for a zero length request.
    pub fn read_file<H>(&mut self, handle: &H, size: u32) -> io::Result<()>
    where
        H: AsRawHandle + ?Sized,
    {
        self.ensure_idle()?;

        let mut buf = vec![0u8; cmp::max(size as usize, 1)];
        let ptr = buf.as_mut_ptr();

        self.inner.handle = handle.as_raw_handle() as HANDLE;
        self.inner.data = OpData::Read(buf);

        let mut read = 0 as DWORD;

        let result = unsafe {
            fileapi::ReadFile(
                self.inner.handle,
                ptr as *mut c_void,
                size,
                &mut read,
                self.raw(),
            )
        };

        let error = if result == FALSE {
            unsafe { errhandlingapi::GetLastError() }
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with_read(error)
    }

    /// Start an overlapped receive of up to `size` bytes from a socket.
    pub fn recv<S>(&mut self, socket: &S, size: u32, flags: u32) -> io::Result<()>
    where
        S: AsRawSocket + ?Sized,
    {
        self.ensure_idle()?;

        let mut buf = vec![0u8; cmp::max(size as usize, 1)];

        let mut wsabuf = WSABUF {
            len: size,
            buf: buf.as_mut_ptr() as *mut _,
        };

        self.inner.handle = socket.as_raw_socket() as usize as HANDLE;
        self.inner.data = OpData::Read(buf);

        let mut received = 0 as DWORD;
        let mut flags = flags;

        let result = unsafe {
            winsock2::WSARecv(
                socket.as_raw_socket() as SOCKET,
                &mut wsabuf,
                1,
                &mut received,
                &mut flags,
                self.raw() as *mut _,
                None,
            )
        };

        let error = if result < 0 {
            errors::wsa_last_error()
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with_read(error)
    }

    /// Start an overlapped write of `buf` to a file or pipe handle.
    ///
    /// The byte source is retained by the operation until the kernel
    /// confirms completion or abort, so any owned or shared container that
    /// dereferences to bytes works. Sources longer than the system's
    /// per-call limit are rejected before any call is issued.
    pub fn write_file<H, B>(&mut self, handle: &H, buf: B) -> io::Result<()>
    where
        H: AsRawHandle + ?Sized,
        B: AsRef<[u8]> + Send + 'static,
    {
        self.ensure_idle()?;

        let buf: Box<dyn AsRef<[u8]> + Send> = Box::new(buf);
        let (ptr, len) = {
            let slice = (*buf).as_ref();
            (slice.as_ptr(), slice.len())
        };

        let len = DWORD::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer too large"))?;

        self.inner.handle = handle.as_raw_handle() as HANDLE;
        self.inner.data = OpData::Write(buf);

        let mut written = 0 as DWORD;

        let result = unsafe {
            fileapi::WriteFile(
                self.inner.handle,
                ptr as *const c_void,
                len,
                &mut written,
                self.raw(),
            )
        };

        let error = if result == FALSE {
            unsafe { errhandlingapi::GetLastError() }
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with(error)
    }

    /// Start an overlapped send of `buf` over a socket.
    pub fn send<S, B>(&mut self, socket: &S, buf: B, flags: u32) -> io::Result<()>
    where
        S: AsRawSocket + ?Sized,
        B: AsRef<[u8]> + Send + 'static,
    {
        self.ensure_idle()?;

        let buf: Box<dyn AsRef<[u8]> + Send> = Box::new(buf);
        let (ptr, len) = {
            let slice = (*buf).as_ref();
            (slice.as_ptr(), slice.len())
        };

        let len = DWORD::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "buffer too large"))?;

        let mut wsabuf = WSABUF {
            len,
            buf: ptr as *mut _,
        };

        self.inner.handle = socket.as_raw_socket() as usize as HANDLE;
        self.inner.data = OpData::Write(buf);

        let mut sent = 0 as DWORD;

        let result = unsafe {
            winsock2::WSASend(
                socket.as_raw_socket() as SOCKET,
                &mut wsabuf,
                1,
                &mut sent,
                flags,
                self.raw() as *mut _,
                None,
            )
        };

        let error = if result < 0 {
            errors::wsa_last_error()
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with(error)
    }

    /// Start an overlapped accept on a listening socket, handing the
    /// connection to the pre-created, unbound `accepted` socket.
    ///
    /// The operation owns a buffer sized for the local and remote addresses
    /// the system deposits. Once the completion is observed, the accepted
    /// socket is finalized with
    /// [SO_UPDATE_ACCEPT_CONTEXT][crate::flags::SO_UPDATE_ACCEPT_CONTEXT].
    pub fn accept<L, A>(&mut self, listener: &L, accepted: &A) -> io::Result<()>
    where
        L: AsRawSocket + ?Sized,
        A: AsRawSocket + ?Sized,
    {
        self.ensure_idle()?;

        let ext = ext::wsa_extensions()?;

        // Each address slot needs 16 bytes of slack on top of the largest
        // address the system may produce.
        let addr_len = mem::size_of::<SOCKADDR_IN6_LH>() + 16;
        let mut buf = vec![0u8; addr_len * 2];
        let ptr = buf.as_mut_ptr();

        self.inner.handle = listener.as_raw_socket() as usize as HANDLE;
        self.inner.data = OpData::Accept(buf);

        let mut received = 0 as DWORD;

        let result = unsafe {
            (ext.accept_ex)(
                listener.as_raw_socket() as SOCKET,
                accepted.as_raw_socket() as SOCKET,
                ptr as *mut c_void,
                0,
                addr_len as DWORD,
                addr_len as DWORD,
                &mut received,
                self.raw(),
            )
        };

        let error = if result == FALSE {
            errors::wsa_last_error()
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with(error)
    }

    /// Start an overlapped connect of a bound, unconnected socket to the
    /// given address.
    ///
    /// The host string is converted by the system's numeric parser only; a
    /// name that needs resolution is an error. Once the completion is
    /// observed, the socket is finalized with
    /// [SO_UPDATE_CONNECT_CONTEXT][crate::flags::SO_UPDATE_CONNECT_CONTEXT].
    pub fn connect<'a, S, A>(&mut self, socket: &S, address: A) -> io::Result<()>
    where
        S: AsRawSocket + ?Sized,
        A: Into<SocketAddress<'a>>,
    {
        self.ensure_idle()?;

        let ext = ext::wsa_extensions()?;

        let (storage, len) = match address.into().parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                self.inner.error = e.raw_os_error().unwrap_or(0) as u32;
                self.inner.data = OpData::NotStarted;
                return Err(e);
            }
        };

        self.inner.handle = socket.as_raw_socket() as usize as HANDLE;
        self.inner.data = OpData::Connect;

        let result = unsafe {
            (ext.connect_ex)(
                socket.as_raw_socket() as SOCKET,
                &storage as *const _ as *const SOCKADDR,
                len,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                self.raw(),
            )
        };

        let error = if result == FALSE {
            errors::wsa_last_error()
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with(error)
    }

    /// Start an overlapped disconnect of a connected socket.
    ///
    /// Passing [TF_REUSE_SOCKET][crate::flags::TF_REUSE_SOCKET] leaves the
    /// socket reusable for another connect or accept once the completion is
    /// observed.
    pub fn disconnect<S>(&mut self, socket: &S, flags: u32) -> io::Result<()>
    where
        S: AsRawSocket + ?Sized,
    {
        self.ensure_idle()?;

        let ext = ext::wsa_extensions()?;

        self.inner.handle = socket.as_raw_socket() as usize as HANDLE;
        self.inner.data = OpData::Disconnect;

        let result = unsafe {
            (ext.disconnect_ex)(socket.as_raw_socket() as SOCKET, self.raw(), flags, 0)
        };

        let error = if result == FALSE {
            errors::wsa_last_error()
        } else {
            errors::ERROR_SUCCESS
        };

        self.started_with(error)
    }

    /// Start an overlapped wait for a client on the server end of a named
    /// pipe.
    pub fn connect_named_pipe<H>(&mut self, handle: &H) -> io::Result<()>
    where
        H: AsRawHandle + ?Sized,
    {
        self.ensure_idle()?;

        self.inner.handle = handle.as_raw_handle() as HANDLE;
        self.inner.data = OpData::ConnectPipe;

        let result = unsafe { namedpipeapi::ConnectNamedPipe(self.inner.handle, self.raw()) };

        let error = if result == FALSE {
            unsafe { errhandlingapi::GetLastError() }
        } else {
            errors::ERROR_SUCCESS
        };

        self.inner.error = error;

        match error {
            errors::ERROR_SUCCESS | errors::ERROR_IO_PENDING => Ok(()),
            errors::ERROR_PIPE_CONNECTED => {
                // A client raced us and is already attached. No completion
                // will be queued, so settle the block by hand.
                self.mark_completed();
                Ok(())
            }
            error => {
                self.inner.data = OpData::NotStarted;
                Err(errors::os_error(error))
            }
        }
    }

    fn mark_completed(&self) {
        unsafe {
            let raw = self.raw();
            (*raw).Internal = 0;

            if !(*raw).hEvent.is_null() {
                synchapi::SetEvent((*raw).hEvent);
            }
        }
    }

    /// Retrieve the result of the operation.
    ///
    /// With `wait` set this blocks until the kernel finishes the operation;
    /// without it, a still-pending operation reports the incomplete error.
    /// The observed code is recorded in [error][Overlapped::error]. A broken
    /// pipe is end-of-stream for operations holding a read buffer and an
    /// error for everything else.
    ///
    /// For reads the owned buffer, truncated to exactly the transferred
    /// byte count, moves to the caller on first success. Callers must not
    /// assume the buffer retains its requested length.
    pub fn result(&mut self, wait: bool) -> io::Result<OpOutput> {
        match self.inner.data {
            OpData::Idle => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "operation not yet attempted",
                ));
            }
            OpData::NotStarted => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "operation failed to start",
                ));
            }
            _ => (),
        }

        let mut transferred = 0 as DWORD;

        let result = unsafe {
            ioapiset::GetOverlappedResult(
                self.inner.handle,
                self.raw(),
                &mut transferred,
                if wait { TRUE } else { FALSE },
            )
        };

        let error = if result == FALSE {
            unsafe { errhandlingapi::GetLastError() }
        } else {
            errors::ERROR_SUCCESS
        };

        self.inner.error = error;

        match error {
            errors::ERROR_SUCCESS | errors::ERROR_MORE_DATA => (),
            errors::ERROR_BROKEN_PIPE if self.inner.data.has_read_buffer() => (),
            error => return Err(errors::os_error(error)),
        }

        match &mut self.inner.data {
            OpData::Read(buf) => {
                let mut buf = mem::take(buf);
                buf.truncate(transferred as usize);
                Ok(OpOutput::Bytes(buf))
            }
            OpData::Write(..) => Ok(OpOutput::Transferred(transferred)),
            OpData::Accept(..) | OpData::Connect | OpData::Disconnect | OpData::ConnectPipe => {
                Ok(OpOutput::Done)
            }
            OpData::Idle | OpData::NotStarted => unreachable!(),
        }
    }

    /// Request cancellation of the operation.
    ///
    /// A no-op for operations that failed to start or that the kernel has
    /// already completed. The call never waits: a cancelled operation still
    /// surfaces through the completion port, as either a success or an
    /// abort. The kernel reporting not-found means the operation completed
    /// between the check and the request and is not an error.
    pub fn cancel(&self) -> io::Result<()> {
        if let OpData::NotStarted = self.inner.data {
            return Ok(());
        }

        let mut result = TRUE;

        if !self.io_completed() {
            trace!(op = self.inner.data.name(), "cancel");

            result = match ext::cancel_io_ex() {
                Some(cancel_io_ex) => unsafe { cancel_io_ex(self.inner.handle, self.raw()) },
                None => unsafe { ioapiset::CancelIo(self.inner.handle) },
            };
        }

        if result == FALSE {
            let error = unsafe { errhandlingapi::GetLastError() };

            if error != errors::ERROR_NOT_FOUND {
                return Err(errors::os_error(error));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Overlapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlapped")
            .field("address", &self.address())
            .field("op", &self.inner.data.name())
            .field("error", &self.inner.error)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for Overlapped {
    fn drop(&mut self) {
        let saved = unsafe { errhandlingapi::GetLastError() };

        if !self.io_completed() && !matches!(self.inner.data, OpData::NotStarted) {
            // The kernel still owns the control block and may write through
            // the buffer pointers at any moment. Cancel and wait for it to
            // settle before the buffers are released below.
            let mut wait = FALSE;

            if let Some(cancel_io_ex) = ext::cancel_io_ex() {
                if unsafe { cancel_io_ex(self.inner.handle, self.raw()) } != FALSE {
                    wait = TRUE;
                }
            }

            let mut transferred = 0 as DWORD;

            let result = unsafe {
                ioapiset::GetOverlappedResult(
                    self.inner.handle,
                    self.raw(),
                    &mut transferred,
                    wait,
                )
            };

            let error = if result != FALSE {
                errors::ERROR_SUCCESS
            } else {
                unsafe { errhandlingapi::GetLastError() }
            };

            match error {
                errors::ERROR_SUCCESS
                | errors::ERROR_NOT_FOUND
                | errors::ERROR_OPERATION_ABORTED => (),
                _ => {
                    warn!(
                        error,
                        op = self.inner.data.name(),
                        "operation still pending at drop, the process may crash"
                    );
                }
            }
        }

        unsafe {
            let event = (*self.raw()).hEvent;

            if !event.is_null() {
                handleapi::CloseHandle(event);
            }

            errhandlingapi::SetLastError(saved);
        }
    }
}
