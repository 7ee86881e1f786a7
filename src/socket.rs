use crate::errors;
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::windows::io::AsRawSocket;
use std::ptr;
use winapi::ctypes::c_int;
use winapi::shared::ws2def::{ADDRESS_FAMILY, AF_INET, AF_INET6, SOCKADDR, SOCKADDR_IN};
use winapi::shared::ws2ipdef::SOCKADDR_IN6_LH;
use winapi::um::winsock2::{self, SOCKET, SOCKET_ERROR};

/// A numeric socket address in the shape the connect operation consumes.
///
/// The host is a string because conversion is delegated to the system's
/// numeric parser. Deliberately no name resolution happens here; a
/// non-numeric host is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketAddress<'a> {
    /// An IPv4 endpoint.
    V4 {
        host: &'a str,
        port: u16,
    },
    /// An IPv6 endpoint with its flow label and scope.
    V6 {
        host: &'a str,
        port: u16,
        flowinfo: u32,
        scope_id: u32,
    },
}

impl<'a> From<(&'a str, u16)> for SocketAddress<'a> {
    fn from((host, port): (&'a str, u16)) -> Self {
        SocketAddress::V4 { host, port }
    }
}

impl<'a> From<(&'a str, u16, u32, u32)> for SocketAddress<'a> {
    fn from((host, port, flowinfo, scope_id): (&'a str, u16, u32, u32)) -> Self {
        SocketAddress::V6 {
            host,
            port,
            flowinfo,
            scope_id,
        }
    }
}

impl SocketAddress<'_> {
    /// Convert into the native address representation, using storage wide
    /// enough for either family.
    pub(crate) fn parse(&self) -> io::Result<(SOCKADDR_IN6_LH, c_int)> {
        // Safety: both families are plain data and valid when zeroed.
        let mut storage: SOCKADDR_IN6_LH = unsafe { mem::zeroed() };
        let mut length = mem::size_of::<SOCKADDR_IN6_LH>() as c_int;

        match *self {
            SocketAddress::V4 { host, port } => {
                string_to_address(host, AF_INET, &mut storage, &mut length)?;

                // Safety: the parser produced an AF_INET address, which the
                // storage is more than large enough for.
                unsafe {
                    let addr = &mut storage as *mut SOCKADDR_IN6_LH as *mut SOCKADDR_IN;
                    (*addr).sin_port = port.to_be();
                }
            }
            SocketAddress::V6 {
                host,
                port,
                flowinfo,
                scope_id,
            } => {
                string_to_address(host, AF_INET6, &mut storage, &mut length)?;

                storage.sin6_port = port.to_be();
                storage.sin6_flowinfo = flowinfo;

                unsafe {
                    *storage.u.sin6_scope_id_mut() = scope_id;
                }
            }
        }

        Ok((storage, length))
    }
}

fn string_to_address(
    host: &str,
    family: c_int,
    storage: &mut SOCKADDR_IN6_LH,
    length: &mut c_int,
) -> io::Result<()> {
    let host = CString::new(host)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "host contains a nul byte"))?;

    let result = unsafe {
        winsock2::WSAStringToAddressA(
            host.as_ptr() as *mut _,
            family,
            ptr::null_mut(),
            storage as *mut SOCKADDR_IN6_LH as *mut SOCKADDR,
            length,
        )
    };

    if result == SOCKET_ERROR {
        return Err(errors::os_error(errors::wsa_last_error()));
    }

    Ok(())
}

/// Bind a freshly created socket to the wildcard address with an ephemeral
/// port, skipping the resolver entirely.
///
/// The `tuple_len` selector mirrors the shape of the address tuple the
/// socket will later connect with: `2` selects AF_INET and `4` selects
/// AF_INET6. Anything else is rejected before touching the socket.
pub fn bind_local<S>(socket: &S, tuple_len: usize) -> io::Result<()>
where
    S: AsRawSocket + ?Sized,
{
    let socket = socket.as_raw_socket() as SOCKET;

    let result = match tuple_len {
        2 => unsafe {
            let mut addr: SOCKADDR_IN = mem::zeroed();
            addr.sin_family = AF_INET as ADDRESS_FAMILY;

            winsock2::bind(
                socket,
                &addr as *const SOCKADDR_IN as *const SOCKADDR,
                mem::size_of::<SOCKADDR_IN>() as c_int,
            )
        },
        4 => unsafe {
            let mut addr: SOCKADDR_IN6_LH = mem::zeroed();
            addr.sin6_family = AF_INET6 as ADDRESS_FAMILY;

            winsock2::bind(
                socket,
                &addr as *const SOCKADDR_IN6_LH as *const SOCKADDR,
                mem::size_of::<SOCKADDR_IN6_LH>() as c_int,
            )
        },
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "expected address tuple of length 2 or 4",
            ));
        }
    };

    if result == SOCKET_ERROR {
        return Err(errors::os_error(errors::wsa_last_error()));
    }

    Ok(())
}
