//! Error types for rust-vici
//!
//! All failures surface as one [`Error`] enum. Errors are classified by
//! [`Error::is_recoverable`]: recoverable errors (unknown commands, encode
//! failures, lost-event markers) leave the session usable, while fatal errors
//! (transport, protocol, closed) invalidate it. The session latches the first
//! fatal error and replays it on every subsequent call, so the enum is
//! `Clone` with I/O sources held behind an `Arc`.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced by the VICI client
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Socket read or write failure; the session is invalidated
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// Malformed frame, unexpected packet type, or malformed message
    /// element; the session is invalidated
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon does not know the requested command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The daemon does not know the event named in a register or
    /// unregister request
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// A streamed command could not register its stream event
    #[error("failed to register stream event: {0}")]
    EventRegisterFailed(String),

    /// The daemon accepted the command but reported a failure in its reply
    #[error("command {command} failed: {reason}")]
    Command { command: String, reason: String },

    /// Caller-supplied key or value cannot be represented on the wire
    #[error("encode error: {0}")]
    Encode(String),

    /// The session was closed, or the operation was still pending when it
    /// was closed
    #[error("session closed")]
    SessionClosed,

    /// Marker surfaced by the event stream when a bounded event buffer
    /// overflowed and dropped its oldest unread events
    #[error("{0} events dropped by bounded event buffer")]
    LostEvents(u64),
}

impl Error {
    /// Check whether the session remains usable after this error
    ///
    /// Transport and protocol failures leave the connection in an undefined
    /// state and latch the session; everything else surfaces to the caller
    /// without affecting session state.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Protocol(_) | Self::SessionClosed => false,
            Self::UnknownCommand(_)
            | Self::UnknownEvent(_)
            | Self::EventRegisterFailed(_)
            | Self::Command { .. }
            | Self::Encode(_)
            | Self::LostEvents(_) => true,
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an encode error
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a command failure error
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

/// Type alias for Result with the crate's [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
