//! The `protocol` module implements the SSMP wire format: the command and
//! event types exchanged with clients and the line codec that converts them
//! to and from bytes. It holds no state.

pub mod codec;
pub mod message;

pub use codec::{Decoded, MalformedFrame, decode, decode_bounded, decode_event, encode, encode_command};
pub use message::{Command, CommandKind, ErrorCode, Event, Identity, Status, TopicName};
