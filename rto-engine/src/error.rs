//! Error types surfaced by the engine.
//!
//! [`ConnError`] is what the owning application eventually sees for a
//! connection torn down by the retransmit timer.  The remaining types are for
//! collaborators: [`PathError`] for the advisory revalidation hook,
//! [`ConfigError`] for rejected tunables and [`EngineError`] for API misuse.

use std::io;

use thiserror::Error;

/// A POSIX-style connection error reported to the application.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnError {
    #[error("connection timed out")]
    TimedOut,
    #[error("no route to host")]
    HostUnreachable,
    #[error("network is unreachable")]
    NetworkUnreachable,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection reset by peer")]
    Reset,
}

impl ConnError {
    /// The Linux `errno` value for this error.
    pub fn errno(self) -> i32 {
        match self {
            Self::TimedOut => 110,
            Self::HostUnreachable => 113,
            Self::NetworkUnreachable => 101,
            Self::ConnectionRefused => 111,
            Self::Reset => 104,
        }
    }
}

impl From<ConnError> for io::Error {
    fn from(err: ConnError) -> Self {
        let kind = match err {
            ConnError::TimedOut => io::ErrorKind::TimedOut,
            ConnError::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            ConnError::Reset => io::ErrorKind::ConnectionReset,
            ConnError::HostUnreachable | ConnError::NetworkUnreachable => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Failure of the best-effort route / neighbour revalidation hint.
///
/// The engine logs and otherwise ignores it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("path revalidation failed: {0}")]
pub struct PathError(pub String);

/// Rejected [`crate::config::EngineConfig`] values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rto_min ({min:?}) must not exceed rto_max ({max:?})")]
    RtoBounds {
        min: std::time::Duration,
        max: std::time::Duration,
    },
    #[error("syn_retries ({syn}) must not exceed hard_retries ({hard})")]
    SynRetries { syn: u32, hard: u32 },
    #[error("{0} must be non-zero")]
    Zero(&'static str),
}

/// Misuse of the ACK-path / application entry points.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("connection is closed")]
    Closed,
    #[error("operation not permitted in state {0}")]
    BadState(crate::state::ConnectionState),
}
