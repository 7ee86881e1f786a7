//! Flag and option constants re-exported for callers driving handles and
//! sockets through this crate.

use std::os::windows::io::RawHandle;

/// The file or device is being opened or created for asynchronous I/O.
///
/// When subsequent I/O operations are completed on this handle, the event
/// specified in the OVERLAPPED structure will be set to the signaled state.
pub const FILE_FLAG_OVERLAPPED: u32 = 0x40000000;

/// Do not queue a completion packet to the port when the operation completes
/// synchronously with success.
///
/// Set through [set_notification_modes][crate::set_notification_modes].
pub const FILE_SKIP_COMPLETION_PORT_ON_SUCCESS: u8 = 0x1;

/// Do not set the OVERLAPPED event on completion.
///
/// Set through [set_notification_modes][crate::set_notification_modes].
pub const FILE_SKIP_SET_EVENT_ON_HANDLE: u8 = 0x2;

/// Socket option finalizing a socket accepted through
/// [Overlapped::accept][crate::Overlapped::accept], inheriting the listener's
/// properties.
pub const SO_UPDATE_ACCEPT_CONTEXT: i32 = 0x700B;

/// Socket option finalizing a socket connected through
/// [Overlapped::connect][crate::Overlapped::connect].
pub const SO_UPDATE_CONNECT_CONTEXT: i32 = 0x7010;

/// Flag for [Overlapped::disconnect][crate::Overlapped::disconnect] marking
/// the socket as reusable for another connect call.
pub const TF_REUSE_SOCKET: u32 = 0x02;

/// Timeout value that never elapses.
pub const INFINITE: u32 = 0xFFFF_FFFF;

/// The sentinel returned by handle-producing calls on failure.
pub const INVALID_HANDLE_VALUE: RawHandle = -1isize as RawHandle;
