//! Error types for the broadcast node.

use std::fmt;

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the node.
///
/// Protocol-level errors are recovered at their point of origin: a bad
/// message is rejected, a failed pull is skipped until the next tick.
/// Nothing in the anti-entropy engine terminates the process.
#[derive(Debug)]
pub enum Error {
    /// Inbound envelope or body failed to decode into the expected shape.
    MalformedMessage(String),

    /// A peer reported a cursor past the end of the local log.
    ///
    /// This signals a restarted peer with lost state or a bug on the
    /// remote side. The current delta computation is aborted and local
    /// state is left unchanged.
    InconsistentCursor {
        /// Cursor the peer reported.
        remote: u64,
        /// Length of the local log.
        local: u64,
    },

    /// A synchronous pull request did not complete within its bound.
    Timeout {
        /// Peer that failed to answer in time.
        peer: String,
    },

    /// Send or RPC failed below the protocol layer.
    Transport {
        /// Target node that we failed to reach.
        peer: String,
        /// Underlying error message.
        reason: String,
    },

    /// The node has been shut down.
    Shutdown,

    /// Internal channel error.
    Channel(String),

    /// Generic IO error.
    Io(std::io::Error),
}

impl Error {
    /// Whether the node keeps running after this error.
    ///
    /// Only IO failures on the runtime boundary are fatal; everything
    /// the engine produces is handled per-message or per-neighbor.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Shutdown)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedMessage(msg) => {
                write!(f, "malformed message: {}", msg)
            }
            Error::InconsistentCursor { remote, local } => {
                write!(
                    f,
                    "inconsistent cursor: remote reports {} but local log length is {}",
                    remote, local
                )
            }
            Error::Timeout { peer } => {
                write!(f, "sync request to {} timed out", peer)
            }
            Error::Transport { peer, reason } => {
                write!(f, "failed to reach {}: {}", peer, reason)
            }
            Error::Shutdown => {
                write!(f, "node has been shut down")
            }
            Error::Channel(msg) => {
                write!(f, "channel error: {}", msg)
            }
            Error::Io(err) => {
                write!(f, "IO error: {}", err)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedMessage(err.to_string())
    }
}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(err: async_channel::SendError<T>) -> Self {
        Error::Channel(err.to_string())
    }
}

impl From<async_channel::RecvError> for Error {
    fn from(err: async_channel::RecvError) -> Self {
        Error::Channel(err.to_string())
    }
}
