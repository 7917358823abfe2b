//! Library-level tracing that costs nothing unless asked for.
//!
//! With the `logging` feature the macros below forward to `tracing`; without
//! it they expand to nothing, so call sites never need their own `cfg`.
//! Consumers install their own subscriber. The `wit-bridge` binary installs
//! one from its `[logging]` configuration.
//!
//! ```rust,ignore
//! use crate::logging::{debug, trace};
//!
//! debug!(protocol = %allocator.protocol(), "detected guest allocator");
//! trace!(ptr, size = layout.size, "lifted value");
//! ```

/// Per-value codec steps and handle churn.
#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

/// Registration, cache misses and allocator detection.
#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

/// Setup milestones such as host function registration.
#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

/// Guest exports that look wrong but are not fatal on their own.
#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

/// Host functions that trap the calling guest.
#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => { tracing::error!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

pub(crate) use log_debug as debug;
pub(crate) use log_error as error;
pub(crate) use log_info as info;
pub(crate) use log_trace as trace;
pub(crate) use log_warn as warn;
