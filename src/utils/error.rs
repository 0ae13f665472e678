//! The `error` module defines the error types used within the `ssmp` crate.
//!
//! Each layer gets its own enum so callers can match on exactly the failures
//! that layer produces. Errors that reach a client are translated into an
//! [`ErrorCode`] and sent back in a reply record; everything else stays local
//! to the connection that caused it.

use std::io;

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Validation failure for an identity or topic name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("must not be empty")]
    Empty,
    #[error("must be at most {max} characters")]
    TooLong { max: usize },
    #[error("must not contain whitespace or control characters")]
    DisallowedCharacter,
}

/// Why a record could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown verb {0}")]
    UnknownVerb(String),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("unexpected field {0}")]
    UnexpectedField(String),
    #[error("control character in {0}")]
    ControlCharacter(&'static str),
    #[error("sequence token {0} is reserved")]
    ReservedSequence(String),
    #[error("invalid {field}: {source}")]
    InvalidName {
        field: &'static str,
        #[source]
        source: NameError,
    },
    #[error("unknown status {0}")]
    UnknownStatus(String),
    #[error("unknown error code {0}")]
    UnknownErrorCode(String),
    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("session is already authenticated")]
    AlreadyAuthenticated,
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[source] NameError),
    #[error("session is closed")]
    Closed,
    #[error("outbound queue exceeded {capacity} events")]
    QueueFull { capacity: usize },
    #[error("connection writer has gone away")]
    Disconnected,
}

impl SessionError {
    /// Wire code reported to the client. Queue and lifecycle failures are
    /// handled by disconnecting and never reach the wire.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotAuthenticated => ErrorCode::NotAuthenticated,
            SessionError::AlreadyAuthenticated => ErrorCode::AlreadyAuthenticated,
            SessionError::InvalidIdentity(_) => ErrorCode::InvalidIdentity,
            SessionError::Closed | SessionError::QueueFull { .. } | SessionError::Disconnected => {
                ErrorCode::ProtocolError
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("already subscribed")]
    AlreadySubscribed,
    #[error("not subscribed")]
    NotSubscribed,
}

impl RegistryError {
    pub fn code(self) -> ErrorCode {
        match self {
            RegistryError::NotAuthenticated => ErrorCode::NotAuthenticated,
            RegistryError::AlreadySubscribed => ErrorCode::AlreadySubscribed,
            RegistryError::NotSubscribed => ErrorCode::NotSubscribed,
        }
    }
}

/// Errors surfaced to transport adapters by the broker handle.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection limit of {limit} reached")]
    TooManyConnections { limit: usize },
    #[error("broker is no longer running")]
    Unavailable,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by server")]
    ConnectionClosed,
    #[error("server replied {code}{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Rejected {
        code: ErrorCode,
        detail: Option<String>,
    },
    #[error("malformed record: {0}")]
    Malformed(#[source] FrameError),
    #[error("invalid topic: {0}")]
    InvalidTopic(#[source] NameError),
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[source] NameError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
