/// Same as [tracing::trace!][tracing::trace].
#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($tt:tt)*) => {tracing::trace!($($tt)*)}
}

/// Tracing disabled.
#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($tt:tt)*) => {};
}

/// Same as [tracing::warn!][tracing::warn].
#[cfg(feature = "tracing")]
macro_rules! warn {
    ($($tt:tt)*) => {tracing::warn!($($tt)*)}
}

/// Tracing disabled.
#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($tt:tt)*) => {};
}
