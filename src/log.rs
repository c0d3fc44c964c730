//! Logging macros which forward to the `log` crate when the `logging`
//! feature is enabled, and compile to nothing otherwise.

#[cfg(feature = "logging")]
pub(crate) use log::{debug, error, trace, warn};

#[cfg(not(feature = "logging"))]
mod noop {
    macro_rules! trace { ($($tt:tt)*) => {{}} }
    macro_rules! debug { ($($tt:tt)*) => {{}} }
    macro_rules! warn { ($($tt:tt)*) => {{}} }
    macro_rules! error { ($($tt:tt)*) => {{}} }

    pub(crate) use {debug, error, trace, warn};
}

#[cfg(not(feature = "logging"))]
pub(crate) use noop::{debug, error, trace, warn};
