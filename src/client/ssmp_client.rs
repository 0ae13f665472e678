use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::protocol::codec::{self, Decoded, NO_SEQUENCE};
use crate::protocol::{Command, CommandKind, Event, Identity, Status, TopicName};
use crate::utils::error::{ClientError, FrameError};

const READ_CHUNK: usize = 4 * 1024;

/// A client connection to an SSMP server.
///
/// Requests are numbered `1`, `2`, `3`... and each call waits for the reply
/// carrying its own sequence token. Events that arrive in the meantime, such
/// as deliveries and presence changes, are kept in arrival order and handed
/// out by [`SsmpClient::next_event`].
///
/// The server answers records in the order it reads them, so replies owed to
/// records written with [`SsmpClient::send_raw`] arrive before the reply to
/// any later request. Those replies, including `*` errors, are queued as
/// events rather than taken as the request's answer.
pub struct SsmpClient<S = TcpStream> {
    stream: S,
    buffer: Vec<u8>,
    pending: VecDeque<Event>,
    next_seq: u64,
    // raw records whose reply has not been read yet
    raw_unanswered: usize,
}

impl SsmpClient<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }
}

impl<S> SsmpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected byte stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            next_seq: 1,
            raw_unanswered: 0,
        }
    }

    pub async fn login(&mut self, identity: &str) -> Result<(), ClientError> {
        let identity = Identity::new(identity).map_err(ClientError::InvalidIdentity)?;
        self.request(CommandKind::Login {
            identity: identity.as_str().to_string(),
        })
        .await
    }

    pub async fn logout(&mut self) -> Result<(), ClientError> {
        self.request(CommandKind::Logout).await
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        let topic = TopicName::new(topic).map_err(ClientError::InvalidTopic)?;
        self.request(CommandKind::Subscribe { topic }).await
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        let topic = TopicName::new(topic).map_err(ClientError::InvalidTopic)?;
        self.request(CommandKind::Unsubscribe { topic }).await
    }

    /// Publishes `payload` verbatim. The payload may contain spaces but not
    /// line breaks.
    pub async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ClientError> {
        let topic = TopicName::new(topic).map_err(ClientError::InvalidTopic)?;
        if payload.contains(['\n', '\r']) {
            return Err(ClientError::Malformed(FrameError::ControlCharacter(
                "payload",
            )));
        }
        self.request(CommandKind::Publish {
            topic,
            payload: payload.to_string(),
        })
        .await
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.request(CommandKind::Ping).await
    }

    /// Next event that was not a reply to one of this client's requests.
    pub async fn next_event(&mut self) -> Result<Event, ClientError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        let event = self.read_event().await?;
        if is_reply(&event) {
            self.raw_unanswered = self.raw_unanswered.saturating_sub(1);
        }
        Ok(event)
    }

    /// Writes one raw record, appending the newline. Replies are not awaited
    /// and show up through [`SsmpClient::next_event`].
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        // blank records are skipped by the server and never answered
        if !line.trim().is_empty() {
            self.raw_unanswered += 1;
        }
        Ok(())
    }

    async fn request(&mut self, kind: CommandKind) -> Result<(), ClientError> {
        let seq = self.next_seq.to_string();
        self.next_seq += 1;
        let expects_pong = matches!(kind, CommandKind::Ping);
        let command = Command {
            seq: seq.clone(),
            kind,
        };
        debug!(%command, "sending request");
        self.stream
            .write_all(&codec::encode_command(&command))
            .await?;
        self.stream.flush().await?;

        loop {
            let event = self.read_event().await?;
            let ours = matches!(&event, Event::Reply { seq: reply, .. } if *reply == seq);
            if !ours && is_reply(&event) && self.raw_unanswered > 0 {
                self.raw_unanswered -= 1;
                self.pending.push_back(event);
                continue;
            }
            match event {
                Event::Pong if expects_pong => return Ok(()),
                Event::Reply { seq: reply, status } if reply == seq || reply == NO_SEQUENCE => {
                    // anything sent raw before this request has been answered
                    self.raw_unanswered = 0;
                    return match status {
                        Status::Ok { .. } => Ok(()),
                        Status::Error { code, detail } => Err(ClientError::Rejected { code, detail }),
                    };
                }
                other => self.pending.push_back(other),
            }
        }
    }

    async fn read_event(&mut self) -> Result<Event, ClientError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let (outcome, consumed) = match codec::decode_event(&self.buffer) {
                Decoded::Frame(event, rest) => (Some(Ok(event)), self.buffer.len() - rest.len()),
                Decoded::Malformed(frame, rest) => (
                    Some(Err(ClientError::Malformed(frame.error))),
                    self.buffer.len() - rest.len(),
                ),
                Decoded::Incomplete(rest) => (None, self.buffer.len() - rest.len()),
                Decoded::Oversized => (
                    Some(Err(ClientError::Malformed(FrameError::FrameTooLong {
                        limit: usize::MAX,
                    }))),
                    self.buffer.len(),
                ),
            };
            self.buffer.drain(..consumed);
            if let Some(result) = outcome {
                return result;
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Whether `event` answers a record, as opposed to being pushed by the server.
fn is_reply(event: &Event) -> bool {
    matches!(event, Event::Reply { .. } | Event::Pong)
}
