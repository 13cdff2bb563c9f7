//! Provides logging facilities.
//!
//! The macros forward to [`defmt`](https://docs.rs/defmt) with the `defmt`
//! feature and to [`log`](https://docs.rs/log) with the `log` feature.
//! Without either, they evaluate their arguments and discard them.
//!
//! Only use the `{}`, `{:?}` and `{:#x}` placeholders, which both back ends
//! understand.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

#[cfg(feature = "defmt")]
pub mod defmt {
    //! Selected [`defmt`] items.

    // This module is hidden in the docs, but would still be imported by a wildcard import of this
    // crate's items.
    #[doc(hidden)]
    pub mod hidden {
        // Required so the macros can access it.
        #[doc(hidden)]
        pub use defmt;
    }

    pub use defmt::{Debug2Format, Display2Format, Format};

    // These are required "internally" by `defmt`.
    pub use defmt::{export, Formatter, Str};
}

#[cfg(all(feature = "log", not(feature = "defmt")))]
#[doc(hidden)]
pub mod hidden {
    pub use log;
}

// The declarative macros are required because the defmt macros expect defmt to be in scope.

/// Logs a message at the trace level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::trace!($($arg)*);
    }};
}

/// Logs a message at the debug level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::debug!($($arg)*);
    }};
}

/// Logs a message at the info level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::info!($($arg)*);
    }};
}

/// Logs a message at the warn level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::warn!($($arg)*);
    }};
}

/// Logs a message at the error level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::error!($($arg)*);
    }};
}

/// Logs a message at the trace level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        $crate::hidden::log::trace!($($arg)*);
    }};
}

/// Logs a message at the debug level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        $crate::hidden::log::debug!($($arg)*);
    }};
}

/// Logs a message at the info level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        $crate::hidden::log::info!($($arg)*);
    }};
}

/// Logs a message at the warn level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        $crate::hidden::log::warn!($($arg)*);
    }};
}

/// Logs a message at the error level.
#[cfg(all(feature = "log", not(feature = "defmt")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::hidden::log::error!($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn macros_accept_arguments() {
        let pid = 3u8;
        let prio = 7u16;
        crate::trace!("plain");
        crate::debug!("thread {} created", pid);
        crate::info!("thread {} prio {}", pid, prio);
        crate::warn!("{:?}", Some(pid));
        crate::error!("{:#x}", prio);
    }
}
