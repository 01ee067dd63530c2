//! Error types for the liveness protocol.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while establishing or running a connection.
///
/// None of these are fatal to the process: each one terminates at most the
/// connection it occurred on.
#[derive(Debug, Error)]
pub enum LivenessError {
    /// Dialing the server failed.
    #[error("dial {addr}: {source}")]
    Dial {
        /// Target that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Binding the listener failed.
    #[error("listen {addr}: {source}")]
    Listen {
        /// Address that was bound.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Accepting a connection failed.
    #[error("accept: {0}")]
    Accept(#[source] io::Error),

    /// Transport setup (a TLS handshake) of an accepted connection failed.
    #[error("handshake with {peer}: {source}")]
    Handshake {
        /// Remote address of the connection.
        peer: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The address frame announced a length other than 4 or 16.
    #[error("invalid address length: {0}")]
    InvalidAddressLength(u8),

    /// A read or write did not complete before its deadline.
    #[error("{op} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out ("read" or "write").
        op: &'static str,
        /// Deadline that was armed for it.
        timeout: Duration,
    },

    /// I/O error on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The address-change hook could not be run.
    #[error("address hook failed: {0}")]
    Hook(String),
}

impl LivenessError {
    /// Check if this error is a protocol violation by the peer.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, LivenessError::InvalidAddressLength(_))
    }

    /// Check if this error is an expired deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LivenessError::Timeout { .. })
    }

    /// Check if this error was raised before a connection existed.
    pub fn is_establishment(&self) -> bool {
        matches!(
            self,
            LivenessError::Dial { .. }
                | LivenessError::Listen { .. }
                | LivenessError::Accept(_)
                | LivenessError::Handshake { .. }
        )
    }

    /// Kind of the underlying I/O error, if there is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            LivenessError::Dial { source, .. }
            | LivenessError::Listen { source, .. }
            | LivenessError::Handshake { source, .. } => Some(source.kind()),
            LivenessError::Accept(err) | LivenessError::Io(err) => Some(err.kind()),
            _ => None,
        }
    }

    /// Check if the peer closed the stream.
    pub fn is_eof(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::UnexpectedEof)
    }
}

/// Result type for liveness operations.
pub type LivenessResult<T> = Result<T, LivenessError>;

/// Invalid configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Heartbeat interval must be positive.
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,

    /// Redial bounds are inverted.
    #[error("minimal redial interval {min:?} exceeds maximal redial interval {max:?}")]
    InvalidRedialRange {
        /// Configured minimum.
        min: Duration,
        /// Configured maximum.
        max: Duration,
    },

    /// Target address is empty.
    #[error("address must not be empty")]
    EmptyAddress,

    /// Hook script is empty.
    #[error("a script must be specified")]
    EmptyScript,

    /// Hook keyword is empty.
    #[error("a non-empty keyword must be specified")]
    EmptyKeyword,
}
