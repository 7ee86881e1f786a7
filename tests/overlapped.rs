#![cfg(windows)]

mod support;

use iocp_proactor::{errors, CompletionPoll, CompletionPort, Overlapped};
use std::io;
use std::time::Duration;
use winapi::um::handleapi;

fn wait_for(port: &CompletionPort, address: usize) -> io::Result<()> {
    loop {
        match port.wait(Some(Duration::from_secs(5)))? {
            CompletionPoll::Status(status) if status.overlapped == address => return Ok(()),
            CompletionPoll::Status(..) => continue,
            CompletionPoll::Timeout => {
                panic!("timed out waiting for completion of {:#x}", address)
            }
        }
    }
}

#[test]
fn short_read_truncates_the_buffer() -> io::Result<()> {
    let (server, client) = support::pipe_pair("short-read")?;
    let port = CompletionPort::new(1)?;
    port.associate(&server, 1)?;

    let mut read = Overlapped::new()?;
    read.read_file(&server, 64)?;

    let mut write = Overlapped::new()?;
    write.write_file(&client, b"0123456789".to_vec())?;
    assert_eq!(write.result(true)?.transferred(), Some(10));

    wait_for(&port, read.address())?;

    let bytes = read.result(false)?.into_bytes().expect("read output");
    assert_eq!(bytes, b"0123456789");

    Ok(())
}

#[test]
fn zero_length_read_yields_empty_bytes() -> io::Result<()> {
    let (server, client) = support::pipe_pair("zero-read")?;

    let mut write = Overlapped::new()?;
    write.write_file(&client, b"abc".to_vec())?;
    write.result(true)?;

    let mut read = Overlapped::new()?;
    read.read_file(&server, 0)?;

    let bytes = read.result(true)?.into_bytes().expect("read output");
    assert!(bytes.is_empty());

    // The handle is still usable and the data still queued.
    let mut read = Overlapped::new()?;
    read.read_file(&server, 64)?;
    let bytes = read.result(true)?.into_bytes().expect("read output");
    assert_eq!(bytes, b"abc");

    Ok(())
}

#[test]
fn second_submission_is_rejected() -> io::Result<()> {
    let (server, client) = support::pipe_pair("double-submit")?;
    let port = CompletionPort::new(1)?;
    port.associate(&server, 1)?;

    let mut read = Overlapped::new()?;
    read.read_file(&server, 64)?;
    assert!(read.pending());

    let e = read.read_file(&server, 64).unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(e.to_string(), "operation already attempted");

    // The original operation is unaffected and completes normally.
    assert!(read.pending());

    let mut write = Overlapped::new()?;
    write.write_file(&client, b"done".to_vec())?;
    write.result(true)?;

    wait_for(&port, read.address())?;
    let bytes = read.result(false)?.into_bytes().expect("read output");
    assert_eq!(bytes, b"done");

    Ok(())
}

#[test]
fn result_reports_unattempted_and_failed_starts() -> io::Result<()> {
    let mut untouched = Overlapped::new()?;
    let e = untouched.result(false).unwrap_err();
    assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    assert_eq!(e.to_string(), "operation not yet attempted");

    // Cancelling an unattempted operation is a no-op.
    untouched.cancel()?;

    let mut failed = Overlapped::new()?;
    let invalid = support::Raw(handleapi::INVALID_HANDLE_VALUE as _);
    assert!(failed.read_file(&invalid, 16).is_err());
    assert!(!failed.pending());
    assert!(!failed.started());

    let e = failed.result(false).unwrap_err();
    assert_eq!(e.to_string(), "operation failed to start");

    // So is cancelling one that never started.
    failed.cancel()?;

    Ok(())
}

#[test]
fn broken_pipe_read_is_end_of_stream() -> io::Result<()> {
    let (server, client) = support::pipe_pair("broken-read")?;
    drop(client);

    let mut read = Overlapped::new()?;
    read.read_file(&server, 64)?;

    assert_eq!(read.error(), errors::ERROR_BROKEN_PIPE);
    assert!(!read.started());
    assert!(!read.pending());

    Ok(())
}

#[test]
fn broken_pipe_write_surfaces_an_error() -> io::Result<()> {
    let (server, client) = support::pipe_pair("broken-write")?;
    drop(client);

    let mut write = Overlapped::new()?;
    let e = write.write_file(&server, b"hello".to_vec());

    assert!(e.is_err());
    assert!(!write.started());

    Ok(())
}

#[test]
fn address_is_stable_and_matches_notifications() -> io::Result<()> {
    let (server, client) = support::pipe_pair("address")?;
    let port = CompletionPort::new(1)?;
    port.associate(&server, 1)?;

    let mut read = Overlapped::new()?;
    let before = read.address();
    assert!(!read.event().is_null());

    read.read_file(&server, 16)?;
    assert_eq!(read.address(), before);

    let mut write = Overlapped::new()?;
    write.write_file(&client, b"x".to_vec())?;
    write.result(true)?;

    match port.wait(Some(Duration::from_secs(5)))? {
        CompletionPoll::Status(status) => assert_eq!(status.overlapped, before),
        CompletionPoll::Timeout => panic!("expected the read completion"),
    }

    assert_eq!(read.address(), before);
    read.result(false)?;

    Ok(())
}

#[test]
fn cancel_settles_through_the_port() -> io::Result<()> {
    let (server, _client) = support::pipe_pair("cancel-race")?;
    let port = CompletionPort::new(1)?;
    port.associate(&server, 1)?;

    let mut read = Overlapped::new()?;
    read.read_file(&server, 64)?;
    assert!(read.pending());

    read.cancel()?;

    // The operation still surfaces through the port no matter how the race
    // went.
    match port.wait(Some(Duration::from_secs(5)))? {
        CompletionPoll::Status(status) => {
            assert_eq!(status.overlapped, read.address());
            assert!(
                status.error == errors::ERROR_SUCCESS
                    || status.error == errors::ERROR_OPERATION_ABORTED,
                "unexpected completion code {}",
                status.error,
            );
        }
        CompletionPoll::Timeout => panic!("cancelled operation never completed"),
    }

    match read.result(false) {
        Ok(output) => assert!(output.into_bytes().expect("read output").len() <= 64),
        Err(e) => assert_eq!(
            e.raw_os_error(),
            Some(errors::ERROR_OPERATION_ABORTED as i32)
        ),
    }

    // Cancelling an operation that already completed is a no-op.
    read.cancel()?;

    Ok(())
}

#[test]
fn notification_modes_can_be_set() -> io::Result<()> {
    let (server, _client) = support::pipe_pair("notify-modes")?;

    iocp_proactor::set_notification_modes(
        &server,
        iocp_proactor::flags::FILE_SKIP_SET_EVENT_ON_HANDLE,
    )?;

    Ok(())
}

#[test]
fn drop_with_pending_operation_settles_cleanly() -> io::Result<()> {
    let (server, _client) = support::pipe_pair("drop-pending")?;
    let port = CompletionPort::new(1)?;
    port.associate(&server, 1)?;

    let mut read = Overlapped::new()?;
    read.read_file(&server, 64)?;
    assert!(read.pending());

    // The destructor cancels, waits for the kernel to let go of the buffer
    // and only then releases it.
    drop(read);

    Ok(())
}
