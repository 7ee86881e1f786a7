//! The operating system error codes this crate interprets.
//!
//! Completion codes travel through the crate as raw numeric values so they
//! can be compared against these constants and stored in
//! [Overlapped::error][crate::Overlapped::error] without translation.

use std::io;
use winapi::um::winsock2;

/// The operation completed successfully.
pub const ERROR_SUCCESS: u32 = 0;
/// Reached the end of the file.
pub const ERROR_HANDLE_EOF: u32 = 38;
/// The network name was deleted. Reported for overlapped socket operations
/// whose peer reset the connection.
pub const ERROR_NETNAME_DELETED: u32 = 64;
/// The pipe has been ended.
pub const ERROR_BROKEN_PIPE: u32 = 109;
/// The semaphore timeout period has expired.
pub const ERROR_SEM_TIMEOUT: u32 = 121;
/// All pipe instances are busy.
pub const ERROR_PIPE_BUSY: u32 = 231;
/// More data is available than fits in the supplied buffer.
pub const ERROR_MORE_DATA: u32 = 234;
/// There is a process on other end of the pipe.
pub const ERROR_PIPE_CONNECTED: u32 = 535;
/// The I/O operation has been aborted because of either a thread exit or an
/// application request.
pub const ERROR_OPERATION_ABORTED: u32 = 995;
/// The overlapped I/O operation is in progress.
pub const ERROR_IO_PENDING: u32 = 997;
/// Element not found. Returned by cancellation when the operation completed
/// before the request was seen.
pub const ERROR_NOT_FOUND: u32 = 1168;
/// The remote computer refused the network connection.
pub const ERROR_CONNECTION_REFUSED: u32 = 1225;
/// The network connection was aborted by the local system.
pub const ERROR_CONNECTION_ABORTED: u32 = 1236;
/// An ICMP port unreachable was received for a datagram operation.
pub const ERROR_PORT_UNREACHABLE: u32 = 1234;
/// The wait operation timed out.
pub const WAIT_TIMEOUT: u32 = 258;

/// Construct an [io::Error] from a raw completion or last-error code.
///
/// The connection family of codes is promoted to its matching
/// [io::ErrorKind] so callers can match on the kind instead of the raw
/// number. Everything else keeps whatever kind the standard library assigns.
pub(crate) fn os_error(code: u32) -> io::Error {
    let kind = match code {
        ERROR_CONNECTION_REFUSED => io::ErrorKind::ConnectionRefused,
        ERROR_CONNECTION_ABORTED => io::ErrorKind::ConnectionAborted,
        ERROR_NETNAME_DELETED => io::ErrorKind::ConnectionReset,
        _ => return io::Error::from_raw_os_error(code as i32),
    };

    io::Error::new(kind, io::Error::from_raw_os_error(code as i32))
}

/// The calling thread's last Winsock error code.
pub(crate) fn wsa_last_error() -> u32 {
    // Safety: no preconditions, reads a thread-local slot.
    unsafe { winsock2::WSAGetLastError() as u32 }
}
