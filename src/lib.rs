//! Low-level primitives for Windows I/O completion ports.
//!
//! This crate exposes the three building blocks a proactor-style event loop
//! needs on Windows: a [CompletionPort] that kernel handles are registered
//! with, an [Overlapped] operation owning one in-flight I/O request and its
//! buffers, and the [bind_local] fast path that prepares sockets for
//! [Overlapped::connect] without a resolver round trip.
//!
//! A [Proactor] ties the three together behind future-shaped [Completion]
//! handles for callers that suspend on individual operations.
#![cfg(windows)]

#[macro_use]
mod macros;

pub mod errors;

pub mod flags;

mod handle;
pub use self::handle::Handle;

mod completion_port;
pub use self::completion_port::{
    set_notification_modes, CompletionPoll, CompletionPort, CompletionStatus,
};

mod ext;
pub use self::ext::ensure_initialized;

mod overlapped;
pub use self::overlapped::{OpOutput, Overlapped};

mod socket;
pub use self::socket::{bind_local, SocketAddress};

mod proactor;
pub use self::proactor::{Completion, Proactor, WAKE_KEY};
