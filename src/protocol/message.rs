//! Command and event types carried by SSMP records.
//!
//! `Display` on [`Command`] and [`Event`] renders the record exactly as it
//! appears on the wire, without the terminating newline.

use std::fmt;
use std::str::FromStr;

use crate::utils::error::NameError;

pub const MAX_IDENTITY_LEN: usize = 64;
pub const MAX_TOPIC_LEN: usize = 256;

fn validate_name(name: &str, max: usize) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().count() > max {
        return Err(NameError::TooLong { max });
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(NameError::DisallowedCharacter);
    }
    Ok(())
}

/// Name of a topic: non-empty, no whitespace, no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate_name(&name, MAX_TOPIC_LEN)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The principal a session authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate_name(&name, MAX_IDENTITY_LEN)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A client request together with the sequence token its reply will echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub seq: String,
    pub kind: CommandKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// The identity is kept raw so that validation failures can be reported
    /// as `InvalidIdentity` rather than as a protocol error.
    Login { identity: String },
    Logout,
    Subscribe { topic: TopicName },
    Unsubscribe { topic: TopicName },
    Publish { topic: TopicName, payload: String },
    Ping,
}

impl CommandKind {
    pub fn verb(&self) -> &'static str {
        match self {
            CommandKind::Login { .. } => "LOGIN",
            CommandKind::Logout => "LOGOUT",
            CommandKind::Subscribe { .. } => "SUBSCRIBE",
            CommandKind::Unsubscribe { .. } => "UNSUBSCRIBE",
            CommandKind::Publish { .. } => "PUBLISH",
            CommandKind::Ping => "PING",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.kind.verb())?;
        match &self.kind {
            CommandKind::Login { identity } => write!(f, " {identity}"),
            CommandKind::Subscribe { topic } | CommandKind::Unsubscribe { topic } => {
                write!(f, " {topic}")
            }
            CommandKind::Publish { topic, payload } => write!(f, " {topic} {payload}"),
            CommandKind::Logout | CommandKind::Ping => Ok(()),
        }
    }
}

/// Error codes carried by `ERROR` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ProtocolError,
    NotAuthenticated,
    AlreadyAuthenticated,
    InvalidIdentity,
    IdentityInUse,
    AlreadySubscribed,
    NotSubscribed,
    NoSuchTopic,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::ProtocolError,
        ErrorCode::NotAuthenticated,
        ErrorCode::AlreadyAuthenticated,
        ErrorCode::InvalidIdentity,
        ErrorCode::IdentityInUse,
        ErrorCode::AlreadySubscribed,
        ErrorCode::NotSubscribed,
        ErrorCode::NoSuchTopic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::NotAuthenticated => "NotAuthenticated",
            ErrorCode::AlreadyAuthenticated => "AlreadyAuthenticated",
            ErrorCode::InvalidIdentity => "InvalidIdentity",
            ErrorCode::IdentityInUse => "IdentityInUse",
            ErrorCode::AlreadySubscribed => "AlreadySubscribed",
            ErrorCode::NotSubscribed => "NotSubscribed",
            ErrorCode::NoSuchTopic => "NoSuchTopic",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok {
        detail: Option<String>,
    },
    Error {
        code: ErrorCode,
        detail: Option<String>,
    },
}

/// A server-to-client record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reply {
        seq: String,
        status: Status,
    },
    Deliver {
        topic: TopicName,
        from: Identity,
        payload: String,
    },
    Presence {
        topic: TopicName,
        identity: Identity,
        online: bool,
    },
    Pong,
}

impl Event {
    pub fn ok(seq: impl Into<String>) -> Self {
        Event::Reply {
            seq: seq.into(),
            status: Status::Ok { detail: None },
        }
    }

    pub fn error(seq: impl Into<String>, code: ErrorCode) -> Self {
        Event::Reply {
            seq: seq.into(),
            status: Status::Error { code, detail: None },
        }
    }

    pub fn error_with(seq: impl Into<String>, code: ErrorCode, detail: impl Into<String>) -> Self {
        Event::Reply {
            seq: seq.into(),
            status: Status::Error {
                code,
                detail: Some(detail.into()),
            },
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Reply { seq, status } => match status {
                Status::Ok { detail } => {
                    write!(f, "{seq} OK")?;
                    if let Some(detail) = detail {
                        write!(f, " {detail}")?;
                    }
                    Ok(())
                }
                Status::Error { code, detail } => {
                    write!(f, "{seq} ERROR {code}")?;
                    if let Some(detail) = detail {
                        write!(f, " {detail}")?;
                    }
                    Ok(())
                }
            },
            Event::Deliver {
                topic,
                from,
                payload,
            } => write!(f, "EVENT {topic} {from} {payload}"),
            Event::Presence {
                topic,
                identity,
                online,
            } => {
                let state = if *online { "ONLINE" } else { "OFFLINE" };
                write!(f, "PRESENCE {topic} {identity} {state}")
            }
            Event::Pong => f.write_str("PONG"),
        }
    }
}
