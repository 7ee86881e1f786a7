#![cfg(windows)]

use iocp_proactor::{
    bind_local, ensure_initialized, CompletionPoll, CompletionPort, OpOutput, Overlapped,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::io;
use std::time::Duration;

fn tcp_socket(domain: Domain) -> io::Result<Socket> {
    Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
}

/// Dequeue completions until every listed address has been seen.
fn wait_for_all(port: &CompletionPort, addresses: &[usize]) -> io::Result<()> {
    let mut outstanding = addresses.iter().copied().collect::<HashSet<_>>();

    while !outstanding.is_empty() {
        match port.wait(Some(Duration::from_secs(5)))? {
            CompletionPoll::Status(status) => {
                outstanding.remove(&status.overlapped);
            }
            CompletionPoll::Timeout => panic!("timed out with {:?} outstanding", outstanding),
        }
    }

    Ok(())
}

#[test]
fn bind_local_rejects_odd_tuple_shapes() -> io::Result<()> {
    let socket = tcp_socket(Domain::IPV4)?;

    let e = bind_local(&socket, 3).unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(e.to_string(), "expected address tuple of length 2 or 4");

    bind_local(&socket, 2)?;

    let addr = socket.local_addr()?;
    assert_ne!(addr.as_socket().expect("inet address").port(), 0);

    Ok(())
}

#[test]
fn accept_and_connect_meet_through_the_port() -> io::Result<()> {
    ensure_initialized()?;

    let port = CompletionPort::new(0)?;

    let listener = tcp_socket(Domain::IPV4)?;
    bind_local(&listener, 2)?;
    listener.listen(8)?;
    port.associate_socket(&listener, 1)?;

    let target = listener.local_addr()?.as_socket().expect("inet address");

    let accepted = tcp_socket(Domain::IPV4)?;
    let mut accept = Overlapped::new()?;
    accept.accept(&listener, &accepted)?;

    let client = tcp_socket(Domain::IPV4)?;
    bind_local(&client, 2)?;
    port.associate_socket(&client, 2)?;

    let mut connect = Overlapped::new()?;
    connect.connect(&client, ("127.0.0.1", target.port()))?;

    wait_for_all(&port, &[accept.address(), connect.address()])?;

    assert!(matches!(accept.result(false)?, OpOutput::Done));
    assert!(matches!(connect.result(false)?, OpOutput::Done));

    Ok(())
}

#[test]
fn connect_over_ipv6() -> io::Result<()> {
    ensure_initialized()?;

    // Not every environment carries a loopback v6 interface.
    let listener = match tcp_socket(Domain::IPV6) {
        Ok(listener) => listener,
        Err(..) => return Ok(()),
    };

    bind_local(&listener, 4)?;
    listener.listen(8)?;

    let target = listener.local_addr()?.as_socket().expect("inet6 address");

    let port = CompletionPort::new(0)?;
    let client = tcp_socket(Domain::IPV6)?;
    bind_local(&client, 4)?;
    port.associate_socket(&client, 1)?;

    let mut connect = Overlapped::new()?;
    connect.connect(&client, ("::1", target.port(), 0, 0))?;

    wait_for_all(&port, &[connect.address()])?;
    assert!(matches!(connect.result(false)?, OpOutput::Done));

    Ok(())
}

#[test]
fn non_numeric_host_fails_without_starting() -> io::Result<()> {
    ensure_initialized()?;

    let client = tcp_socket(Domain::IPV4)?;
    bind_local(&client, 2)?;

    let mut connect = Overlapped::new()?;
    let e = connect.connect(&client, ("not-an-ip", 9000)).unwrap_err();
    assert!(e.raw_os_error().is_some(), "expected an os error: {}", e);

    assert!(!connect.pending());
    assert!(!connect.started());

    let e = connect.result(false).unwrap_err();
    assert_eq!(e.to_string(), "operation failed to start");

    Ok(())
}
