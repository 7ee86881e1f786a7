//! Winsock extension functions resolved at runtime.
//!
//! The connection-establishment entry points have no import-library stubs,
//! so they are fetched once per process through
//! `SIO_GET_EXTENSION_FUNCTION_POINTER` on a throwaway TCP socket. The
//! thread-safe cancellation entry point is probed separately and is allowed
//! to be missing, in which case cancellation falls back to the per-thread
//! variant.

use crate::errors;
use once_cell::sync::OnceCell;
use std::io;
use std::mem;
use std::ptr;
use std::sync::Once;
use winapi::ctypes::{c_int, c_void};
use winapi::shared::guiddef::GUID;
use winapi::shared::minwindef::{BOOL, DWORD};
use winapi::shared::ws2def::{AF_INET, IPPROTO_TCP, SOCKADDR};
use winapi::um::libloaderapi;
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::winnt::HANDLE;
use winapi::um::winsock2;
use winapi::um::winsock2::{INVALID_SOCKET, SOCKET, SOCKET_ERROR, SOCK_STREAM};

pub(crate) type AcceptExFn = unsafe extern "system" fn(
    SOCKET,
    SOCKET,
    *mut c_void,
    DWORD,
    DWORD,
    DWORD,
    *mut DWORD,
    *mut OVERLAPPED,
) -> BOOL;

pub(crate) type ConnectExFn = unsafe extern "system" fn(
    SOCKET,
    *const SOCKADDR,
    c_int,
    *mut c_void,
    DWORD,
    *mut DWORD,
    *mut OVERLAPPED,
) -> BOOL;

pub(crate) type DisconnectExFn =
    unsafe extern "system" fn(SOCKET, *mut OVERLAPPED, DWORD, DWORD) -> BOOL;

pub(crate) type CancelIoExFn = unsafe extern "system" fn(HANDLE, *mut OVERLAPPED) -> BOOL;

/// The ioctl selecting an extension function by GUID.
const SIO_GET_EXTENSION_FUNCTION_POINTER: DWORD = 0xC800_0006;

const WSAID_ACCEPTEX: GUID = GUID {
    Data1: 0xb5367df1,
    Data2: 0xcbac,
    Data3: 0x11cf,
    Data4: [0x95, 0xca, 0x00, 0x80, 0x5f, 0x48, 0xa1, 0x92],
};

const WSAID_CONNECTEX: GUID = GUID {
    Data1: 0x25a207b9,
    Data2: 0xddf3,
    Data3: 0x4660,
    Data4: [0x8e, 0xe9, 0x76, 0xe5, 0x8c, 0x74, 0x06, 0x3e],
};

const WSAID_DISCONNECTEX: GUID = GUID {
    Data1: 0x7fda2e11,
    Data2: 0x8630,
    Data3: 0x436f,
    Data4: [0xa0, 0x31, 0xf5, 0x36, 0xa6, 0xee, 0xc1, 0x57],
};

/// The resolved extension-function table.
pub(crate) struct WsaExtensions {
    pub(crate) accept_ex: AcceptExFn,
    pub(crate) connect_ex: ConnectExFn,
    pub(crate) disconnect_ex: DisconnectExFn,
}

/// Access the process-wide extension table, resolving it on first use.
pub(crate) fn wsa_extensions() -> io::Result<&'static WsaExtensions> {
    static EXTENSIONS: OnceCell<WsaExtensions> = OnceCell::new();
    EXTENSIONS.get_or_try_init(WsaExtensions::load)
}

/// Resolve every extension function this crate depends on.
///
/// Failing to obtain any of the connection-establishment functions is a
/// startup error. Event loops should call this once before going to work so
/// the failure surfaces early instead of inside the first accept.
pub fn ensure_initialized() -> io::Result<()> {
    wsa_extensions().map(|_| ())
}

/// The thread-safe cancellation entry point, when the platform has one.
pub(crate) fn cancel_io_ex() -> Option<CancelIoExFn> {
    static CANCEL_IO_EX: OnceCell<Option<CancelIoExFn>> = OnceCell::new();

    *CANCEL_IO_EX.get_or_init(|| unsafe {
        let kernel32 = libloaderapi::GetModuleHandleA(b"kernel32\0".as_ptr() as *const _);

        if kernel32.is_null() {
            return None;
        }

        let f = libloaderapi::GetProcAddress(kernel32, b"CancelIoEx\0".as_ptr() as *const _)?;
        Some(mem::transmute::<_, CancelIoExFn>(f))
    })
}

impl WsaExtensions {
    fn load() -> io::Result<Self> {
        init_winsock();

        let socket = unsafe { winsock2::socket(AF_INET, SOCK_STREAM, IPPROTO_TCP as c_int) };

        if socket == INVALID_SOCKET {
            return Err(errors::os_error(errors::wsa_last_error()));
        }

        let result = (|| unsafe {
            Ok(Self {
                accept_ex: mem::transmute::<usize, AcceptExFn>(wsa_fn(socket, &WSAID_ACCEPTEX)?),
                connect_ex: mem::transmute::<usize, ConnectExFn>(wsa_fn(socket, &WSAID_CONNECTEX)?),
                disconnect_ex: mem::transmute::<usize, DisconnectExFn>(wsa_fn(
                    socket,
                    &WSAID_DISCONNECTEX,
                )?),
            })
        })();

        unsafe {
            winsock2::closesocket(socket);
        }

        result
    }
}

/// Query a single extension-function pointer by GUID.
fn wsa_fn(socket: SOCKET, guid: &GUID) -> io::Result<usize> {
    let mut ptr = 0usize;
    let mut returned = 0 as DWORD;

    let result = unsafe {
        winsock2::WSAIoctl(
            socket,
            SIO_GET_EXTENSION_FUNCTION_POINTER,
            guid as *const GUID as *mut c_void,
            mem::size_of::<GUID>() as DWORD,
            &mut ptr as *mut usize as *mut c_void,
            mem::size_of::<usize>() as DWORD,
            &mut returned,
            ptr::null_mut(),
            None,
        )
    };

    if result == SOCKET_ERROR || ptr == 0 {
        return Err(errors::os_error(errors::wsa_last_error()));
    }

    Ok(ptr)
}

/// Force Winsock startup through the standard library's socket runtime
/// before issuing raw calls of our own.
fn init_winsock() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = std::net::UdpSocket::bind(("127.0.0.1", 0));
    });
}
