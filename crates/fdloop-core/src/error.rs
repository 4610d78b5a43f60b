//! Error types for fdloop

use core::fmt;
use std::io;

/// Result type for fdloop operations
pub type FdResult<T> = Result<T, FdError>;

/// Errors that can occur while creating or wiring a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FdError {
    /// No callback was supplied at creation
    MissingCallback,

    /// The handle was invalidated
    Invalidated,

    /// The watcher thread could not be spawned
    SpawnFailed,

    /// A source has no signal port to wait on
    ChannelUnavailable,

    /// OS error with errno
    Os(i32),
}

impl fmt::Display for FdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdError::MissingCallback => write!(f, "no callback supplied"),
            FdError::Invalidated => write!(f, "handle invalidated"),
            FdError::SpawnFailed => write!(f, "failed to spawn watcher thread"),
            FdError::ChannelUnavailable => write!(f, "signal channel unavailable"),
            FdError::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for FdError {}

impl From<io::Error> for FdError {
    fn from(e: io::Error) -> Self {
        FdError::Os(e.raw_os_error().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_error() {
        let e: FdError = io::Error::from_raw_os_error(9).into();
        assert_eq!(e, FdError::Os(9));
        assert_eq!(e.to_string(), "OS error: errno 9");
    }

    #[test]
    fn test_display() {
        assert_eq!(FdError::MissingCallback.to_string(), "no callback supplied");
        assert_eq!(FdError::SpawnFailed.to_string(), "failed to spawn watcher thread");
    }
}
