#![allow(dead_code)]

use iocp_proactor::Overlapped;
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt as _;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use winapi::um::fileapi;
use winapi::um::handleapi;
use winapi::um::namedpipeapi;
use winapi::um::winbase;
use winapi::um::winnt;

/// Hands an arbitrary raw handle to APIs bounded on [AsRawHandle].
pub struct Raw(pub RawHandle);

impl AsRawHandle for Raw {
    fn as_raw_handle(&self) -> RawHandle {
        self.0
    }
}

/// Build a connected overlapped named pipe pair, server side first.
pub fn pipe_pair(name: &str) -> io::Result<(OwnedHandle, OwnedHandle)> {
    let path = format!(r"\\.\pipe\iocp-proactor-{}-{}", name, std::process::id());
    let wide: Vec<u16> = OsStr::new(&path).encode_wide().chain(Some(0)).collect();

    let server = unsafe {
        namedpipeapi::CreateNamedPipeW(
            wide.as_ptr(),
            winbase::PIPE_ACCESS_DUPLEX | winbase::FILE_FLAG_OVERLAPPED,
            winbase::PIPE_TYPE_BYTE | winbase::PIPE_REJECT_REMOTE_CLIENTS,
            1,
            65536,
            65536,
            0,
            ptr::null_mut(),
        )
    };

    if server == handleapi::INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }

    let server = unsafe { OwnedHandle::from_raw_handle(server as RawHandle) };

    let client = unsafe {
        fileapi::CreateFileW(
            wide.as_ptr(),
            winnt::GENERIC_READ | winnt::GENERIC_WRITE,
            0,
            ptr::null_mut(),
            fileapi::OPEN_EXISTING,
            winbase::FILE_FLAG_OVERLAPPED,
            ptr::null_mut(),
        )
    };

    if client == handleapi::INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }

    let client = unsafe { OwnedHandle::from_raw_handle(client as RawHandle) };

    // Settle the server side of the connection handshake. The client is
    // already attached, so this either completes on the spot or reports
    // pipe-connected, which the crate settles by hand.
    let mut connect = Overlapped::new()?;
    connect.connect_named_pipe(&server)?;

    if connect.pending() {
        connect.result(true)?;
    }

    Ok((server, client))
}
