use crate::completion_port::{CompletionPoll, CompletionPort, CompletionStatus};
use crate::overlapped::Overlapped;
use futures_util::task::AtomicWaker;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Completion key reserved for wakeups posted through [Proactor::wake].
///
/// Handles must not be associated under this key.
pub const WAKE_KEY: usize = usize::MAX;

/// Overlapped address attached to wakeup posts. Never dereferenced, only
/// compared, so any non-null sentinel works.
const WAKE_TOKEN: usize = 1;

struct Waiter {
    waker: AtomicWaker,
    status: Mutex<Option<CompletionStatus>>,
}

/// A completion port paired with the waiter table an event loop needs to
/// route notifications back to suspended operations.
///
/// One thread drives [poll][Proactor::poll] while any number of tasks hold
/// [Completion] futures handed out by [register][Proactor::register]. The
/// table is keyed by the stable control-block address of each operation.
pub struct Proactor {
    port: CompletionPort,
    waiters: Mutex<HashMap<usize, Arc<Waiter>>>,
}

impl Proactor {
    /// Create a proactor around a fresh completion port.
    pub fn new(concurrency: u32) -> io::Result<Self> {
        Ok(Self {
            port: CompletionPort::new(concurrency)?,
            waiters: Mutex::new(HashMap::new()),
        })
    }

    /// Access the underlying completion port, for associating handles and
    /// sockets.
    pub fn port(&self) -> &CompletionPort {
        &self.port
    }

    /// Register interest in the completion of the given operation and
    /// return a future resolving to its [CompletionStatus].
    ///
    /// An operation that is not pending resolves immediately with a
    /// synthetic status carrying its recorded error code. This covers both
    /// operations the kernel finished before registration and reads that
    /// observed a broken pipe at submission, which never produce a port
    /// notification and would otherwise wait forever.
    pub fn register(&self, ov: &Overlapped) -> Completion<'_> {
        let address = ov.address();

        let waiter = Arc::new(Waiter {
            waker: AtomicWaker::new(),
            status: Mutex::new(None),
        });

        if ov.pending() {
            trace!(address, "register");
            self.waiters.lock().insert(address, waiter.clone());
        } else {
            trace!(address, error = ov.error(), "register settled");

            *waiter.status.lock() = Some(CompletionStatus {
                error: ov.error(),
                bytes_transferred: 0,
                key: 0,
                overlapped: address,
            });
        }

        Completion {
            proactor: self,
            address,
            waiter,
            done: false,
        }
    }

    /// Drain the completion port, dispatching every notification to its
    /// registered waiter.
    ///
    /// Waits up to `timeout` for the first notification, then keeps
    /// draining without waiting until the port is empty. Returns the number
    /// of waiters woken. Notifications without a registered waiter, such as
    /// wakeups or completions whose futures were dropped, are discarded.
    pub fn poll(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut dispatched = 0;
        let mut timeout = timeout;

        loop {
            match self.port.wait(timeout)? {
                CompletionPoll::Timeout => return Ok(dispatched),
                CompletionPoll::Status(status) => {
                    if status.key != WAKE_KEY && self.dispatch(status) {
                        dispatched += 1;
                    }

                    // Whatever else is already queued is collected without
                    // waiting again.
                    timeout = Some(Duration::from_millis(0));
                }
            }
        }
    }

    fn dispatch(&self, status: CompletionStatus) -> bool {
        let waiter = self.waiters.lock().remove(&status.overlapped);

        match waiter {
            Some(waiter) => {
                trace!(address = status.overlapped, error = status.error, "dispatch");
                *waiter.status.lock() = Some(status);
                waiter.waker.wake();
                true
            }
            None => {
                trace!(address = status.overlapped, "no waiter");
                false
            }
        }
    }

    /// Wake a thread blocked in [poll][Proactor::poll] from anywhere by
    /// posting a synthetic notification.
    pub fn wake(&self) -> io::Result<()> {
        self.port.post(0, WAKE_KEY, WAKE_TOKEN)
    }
}

/// A future resolving to the [CompletionStatus] of one registered
/// operation.
///
/// This is a readiness signal only: once it resolves, the actual outcome
/// and buffers are retrieved from the operation itself through
/// [Overlapped::result][crate::Overlapped::result]. Dropping the future
/// before it resolves deregisters the waiter; the operation itself is not
/// cancelled.
pub struct Completion<'a> {
    proactor: &'a Proactor,
    address: usize,
    waiter: Arc<Waiter>,
    done: bool,
}

impl Future for Completion<'_> {
    type Output = CompletionStatus;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        // Register before checking so a dispatch racing us is not lost.
        this.waiter.waker.register(cx.waker());

        if let Some(status) = *this.waiter.status.lock() {
            this.done = true;
            return Poll::Ready(status);
        }

        Poll::Pending
    }
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.proactor.waiters.lock().remove(&self.address);
        }
    }
}
