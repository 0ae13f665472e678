//! Line codec
//!
//! Records are newline-terminated UTF-8 lines made of space or tab separated
//! tokens. The last field of `PUBLISH`, `EVENT` and reply records is free text
//! running to the end of the line: it starts after exactly one separator and
//! is kept verbatim, so `decode_event(&encode(e))` reproduces `e`.
//!
//! Decoding never blocks. When no complete record is buffered the caller gets
//! [`Decoded::Incomplete`] and is expected to append more bytes and retry.

use crate::protocol::message::{
    Command, CommandKind, ErrorCode, Event, Identity, Status, TopicName,
};
use crate::utils::error::FrameError;

/// Longest record accepted from a client, newline excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Sequence token used in error replies to records whose own token could not
/// be read.
pub const NO_SEQUENCE: &str = "*";

/// Tokens that open server records. Clients may not use them as sequence
/// tokens, otherwise replies would be ambiguous.
const RESERVED_SEQUENCES: [&str; 4] = ["EVENT", "PRESENCE", "PONG", NO_SEQUENCE];

/// A record that was read completely but could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFrame {
    /// Sequence token of the record, when it could be read.
    pub seq: Option<String>,
    pub error: FrameError,
}

impl MalformedFrame {
    pub fn new(seq: Option<String>, error: FrameError) -> Self {
        Self { seq, error }
    }

    fn anonymous(error: FrameError) -> Self {
        Self::new(None, error)
    }
}

/// Outcome of one decode step over a byte buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<'a, T> {
    /// One record and the unconsumed tail of the buffer.
    Frame(T, &'a [u8]),
    /// No complete record yet. Carries the tail with leading blank lines
    /// already skipped.
    Incomplete(&'a [u8]),
    /// A complete record that failed to parse, and the tail after it.
    Malformed(MalformedFrame, &'a [u8]),
    /// The pending record is longer than the limit. The stream cannot be
    /// resynchronised and should be closed.
    Oversized,
}

/// Decodes one client command, limiting records to [`DEFAULT_MAX_FRAME_LEN`].
pub fn decode(buf: &[u8]) -> Decoded<'_, Command> {
    decode_bounded(buf, DEFAULT_MAX_FRAME_LEN)
}

pub fn decode_bounded(buf: &[u8], max_frame_len: usize) -> Decoded<'_, Command> {
    decode_with(buf, max_frame_len, parse_command)
}

/// Decodes one server record. Used by clients, so no length limit applies.
pub fn decode_event(buf: &[u8]) -> Decoded<'_, Event> {
    decode_with(buf, usize::MAX, parse_event)
}

pub fn encode(event: &Event) -> Vec<u8> {
    format!("{event}\n").into_bytes()
}

pub fn encode_command(command: &Command) -> Vec<u8> {
    format!("{command}\n").into_bytes()
}

fn decode_with<T>(
    mut buf: &[u8],
    max_frame_len: usize,
    parse: fn(&str) -> Result<T, MalformedFrame>,
) -> Decoded<'_, T> {
    loop {
        // the limit applies to the record itself, line terminator excluded
        let Some(end) = buf.iter().position(|&b| b == b'\n') else {
            let pending = buf.strip_suffix(b"\r").unwrap_or(buf);
            return if pending.len() > max_frame_len {
                Decoded::Oversized
            } else {
                Decoded::Incomplete(buf)
            };
        };

        let rest = &buf[end + 1..];
        let raw = &buf[..end];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.len() > max_frame_len {
            return Decoded::Oversized;
        }
        if raw.iter().all(|&b| b == b' ' || b == b'\t') {
            buf = rest;
            continue;
        }

        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(_) => {
                return Decoded::Malformed(MalformedFrame::anonymous(FrameError::InvalidUtf8), rest);
            }
        };
        return match parse(line) {
            Ok(value) => Decoded::Frame(value, rest),
            Err(malformed) => Decoded::Malformed(malformed, rest),
        };
    }
}

fn is_separator(c: char) -> bool {
    c == ' ' || c == '\t'
}

struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start_matches(is_separator);
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        let end = trimmed.find(is_separator).unwrap_or(trimmed.len());
        let (token, rest) = trimmed.split_at(end);
        self.rest = rest;
        Some(token)
    }

    /// Free text after exactly one separator. `None` when the line ended
    /// right after the previous token.
    fn remainder(&mut self) -> Option<&'a str> {
        let mut chars = self.rest.chars();
        chars.next()?;
        let text = chars.as_str();
        self.rest = "";
        Some(text)
    }

    fn finish(&mut self) -> Result<(), FrameError> {
        match self.next_token() {
            None => Ok(()),
            Some(extra) => {
                let extra = checked(extra, "field")?;
                Err(FrameError::UnexpectedField(extra.to_string()))
            }
        }
    }
}

fn checked<'a>(token: &'a str, name: &'static str) -> Result<&'a str, FrameError> {
    if token.chars().any(char::is_control) {
        Err(FrameError::ControlCharacter(name))
    } else {
        Ok(token)
    }
}

fn field<'a>(fields: &mut Fields<'a>, name: &'static str) -> Result<&'a str, FrameError> {
    let token = fields.next_token().ok_or(FrameError::MissingField(name))?;
    checked(token, name)
}

fn topic(fields: &mut Fields<'_>) -> Result<TopicName, FrameError> {
    TopicName::new(field(fields, "topic")?).map_err(|source| FrameError::InvalidName {
        field: "topic",
        source,
    })
}

fn identity(fields: &mut Fields<'_>) -> Result<Identity, FrameError> {
    Identity::new(field(fields, "identity")?).map_err(|source| FrameError::InvalidName {
        field: "identity",
        source,
    })
}

fn payload(fields: &mut Fields<'_>) -> Result<String, FrameError> {
    let text = fields
        .remainder()
        .ok_or(FrameError::MissingField("payload"))?;
    if text.contains('\r') {
        return Err(FrameError::ControlCharacter("payload"));
    }
    Ok(text.to_string())
}

fn detail(fields: &mut Fields<'_>) -> Result<Option<String>, FrameError> {
    match fields.remainder() {
        Some(text) if text.contains('\r') => Err(FrameError::ControlCharacter("detail")),
        other => Ok(other.map(str::to_string)),
    }
}

fn is_reserved(token: &str) -> bool {
    RESERVED_SEQUENCES
        .iter()
        .any(|reserved| token.eq_ignore_ascii_case(reserved))
}

fn parse_command(line: &str) -> Result<Command, MalformedFrame> {
    let mut fields = Fields::new(line);
    let seq = field(&mut fields, "sequence").map_err(MalformedFrame::anonymous)?;
    if is_reserved(seq) {
        return Err(MalformedFrame::anonymous(FrameError::ReservedSequence(
            seq.to_string(),
        )));
    }
    let kind = parse_command_kind(&mut fields)
        .map_err(|error| MalformedFrame::new(Some(seq.to_string()), error))?;
    Ok(Command {
        seq: seq.to_string(),
        kind,
    })
}

fn parse_command_kind(fields: &mut Fields<'_>) -> Result<CommandKind, FrameError> {
    let verb = field(fields, "verb")?;
    let kind = match verb.to_ascii_uppercase().as_str() {
        "LOGIN" => CommandKind::Login {
            identity: field(fields, "identity")?.to_string(),
        },
        "LOGOUT" => CommandKind::Logout,
        "SUBSCRIBE" => CommandKind::Subscribe {
            topic: topic(fields)?,
        },
        "UNSUBSCRIBE" => CommandKind::Unsubscribe {
            topic: topic(fields)?,
        },
        "PUBLISH" => {
            let topic = topic(fields)?;
            let payload = payload(fields)?;
            return Ok(CommandKind::Publish { topic, payload });
        }
        "PING" => CommandKind::Ping,
        _ => return Err(FrameError::UnknownVerb(verb.to_string())),
    };
    fields.finish()?;
    Ok(kind)
}

fn parse_event(line: &str) -> Result<Event, MalformedFrame> {
    let mut fields = Fields::new(line);
    let head = field(&mut fields, "record type").map_err(MalformedFrame::anonymous)?;
    parse_event_fields(head, &mut fields).map_err(|error| {
        let seq = (!is_reserved(head)).then(|| head.to_string());
        MalformedFrame::new(seq, error)
    })
}

fn parse_event_fields(head: &str, fields: &mut Fields<'_>) -> Result<Event, FrameError> {
    match head.to_ascii_uppercase().as_str() {
        "EVENT" => {
            let topic = topic(fields)?;
            let from = identity(fields)?;
            let payload = payload(fields)?;
            Ok(Event::Deliver {
                topic,
                from,
                payload,
            })
        }
        "PRESENCE" => {
            let topic = topic(fields)?;
            let identity = identity(fields)?;
            let state = field(fields, "presence state")?;
            let online = match state.to_ascii_uppercase().as_str() {
                "ONLINE" => true,
                "OFFLINE" => false,
                _ => return Err(FrameError::UnknownStatus(state.to_string())),
            };
            fields.finish()?;
            Ok(Event::Presence {
                topic,
                identity,
                online,
            })
        }
        "PONG" => {
            fields.finish()?;
            Ok(Event::Pong)
        }
        _ => {
            let seq = head.to_string();
            let status = field(fields, "status")?;
            let status = match status.to_ascii_uppercase().as_str() {
                "OK" => Status::Ok {
                    detail: detail(fields)?,
                },
                "ERROR" => {
                    let code = field(fields, "error code")?;
                    let code = code
                        .parse::<ErrorCode>()
                        .map_err(|_| FrameError::UnknownErrorCode(code.to_string()))?;
                    Status::Error {
                        code,
                        detail: detail(fields)?,
                    }
                }
                _ => return Err(FrameError::UnknownStatus(status.to_string())),
            };
            Ok(Event::Reply { seq, status })
        }
    }
}
