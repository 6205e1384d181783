//! Error taxonomy shared by the invoker and the loader
//!
//! Errors are plain values returned to the immediate caller. Nothing here is
//! ever raised across the native-call boundary: once control has crossed into
//! native code a fault is a process-level event.

use crate::interop::RegisterClass;
use std::fmt;

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An argument cannot be marshaled as requested (for example a string
    /// with an embedded NUL where a terminator must be appended).
    InvalidArgument(String),
    /// More arguments of one register class than the convention has slots,
    /// and the convention descriptor does not allow stack spilling.
    UnsupportedFrame {
        class: RegisterClass,
        capacity: usize,
        position: usize,
    },
    /// The host or the requested convention cannot execute native calls.
    UnsupportedArchitecture(&'static str),
    /// No loaded image owns the given address.
    NotFound,
    /// Loader failure, carrying the message read from the last-error state.
    Native(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for failures reported by the native loader
    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::UnsupportedFrame { class, capacity, position } => write!(
                f,
                "argument {} needs a {} register but all {} are taken and stack spilling is disabled",
                position, class, capacity
            ),
            Self::UnsupportedArchitecture(what) => {
                write!(f, "native calls are not supported: {}", what)
            }
            Self::NotFound => write!(f, "no image found for the given address"),
            Self::Native(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::ffi::NulError> for Error {
    fn from(err: std::ffi::NulError) -> Self {
        Self::InvalidArgument(format!(
            "string contains a NUL byte at offset {}",
            err.nul_position()
        ))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
