//! Arbiter task and the handles transports use to reach it.
//!
//! The arbiter is the single owner of the [`Broker`]. Every connection sends
//! its requests through one unbounded queue and the arbiter applies them in
//! arrival order, so all mutations of the session table and the topic
//! registry are serialized without locks.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::broker::engine::{Broker, BrokerStats};
use crate::protocol::codec::{self, Decoded, MalformedFrame};
use crate::protocol::Command;
use crate::session::{Inbox, SessionId};
use crate::utils::error::{BrokerError, FrameError};

#[derive(Debug)]
enum Request {
    Connect {
        reply: oneshot::Sender<Result<(SessionId, Inbox), BrokerError>>,
    },
    Command {
        session: SessionId,
        command: Command,
    },
    Malformed {
        session: SessionId,
        frame: MalformedFrame,
    },
    Disconnect {
        session: SessionId,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
}

struct Arbiter {
    broker: Broker,
    requests: mpsc::UnboundedReceiver<Request>,
}

impl Arbiter {
    async fn run(mut self) {
        info!("arbiter started");
        while let Some(request) = self.requests.recv().await {
            self.apply(request);
        }
        info!("arbiter stopped, all handles dropped");
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Connect { reply } => {
                let result = self.broker.connect();
                if let Err(Ok((session, _))) = reply.send(result) {
                    // the connecting task went away before it got its session
                    self.broker.disconnect(session);
                }
            }
            Request::Command { session, command } => self.broker.handle(session, command),
            Request::Malformed { session, frame } => self.broker.handle_malformed(session, frame),
            Request::Disconnect { session } => {
                debug!(session = %session, "disconnect requested");
                self.broker.disconnect(session);
            }
            Request::Stats { reply } => {
                let _ = reply.send(self.broker.stats());
            }
        }
    }
}

/// Cloneable entry point to a running arbiter.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    requests: mpsc::UnboundedSender<Request>,
    max_frame_len: usize,
}

impl BrokerHandle {
    /// Moves `broker` into a new arbiter task. Must be called from within a
    /// tokio runtime. The task ends once every handle and connection is gone.
    pub fn spawn(broker: Broker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let max_frame_len = broker.policy().max_frame_len;
        tokio::spawn(
            Arbiter {
                broker,
                requests: rx,
            }
            .run(),
        );
        Self {
            requests: tx,
            max_frame_len,
        }
    }

    /// Opens a session for a newly accepted connection.
    ///
    /// Returns the reading side as a [`Connection`] and the writing side as
    /// the session's [`Inbox`].
    pub async fn on_connect(&self) -> Result<(Connection, Inbox), BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Connect { reply })?;
        let (session, inbox) = rx.await.map_err(|_| BrokerError::Unavailable)??;
        let connection = Connection {
            session,
            buffer: Vec::new(),
            handle: self.clone(),
            disconnected: false,
        };
        Ok((connection, inbox))
    }

    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Request::Stats { reply })?;
        rx.await.map_err(|_| BrokerError::Unavailable)
    }

    fn send(&self, request: Request) -> Result<(), BrokerError> {
        self.requests
            .send(request)
            .map_err(|_| BrokerError::Unavailable)
    }
}

/// Reading side of one client connection.
///
/// Accumulates raw bytes, decodes complete records and forwards them to the
/// arbiter in order. Dropping a `Connection` always disconnects its session,
/// so a reader task that errors out or is cancelled still gets cleaned up.
#[derive(Debug)]
pub struct Connection {
    session: SessionId,
    buffer: Vec<u8>,
    handle: BrokerHandle,
    disconnected: bool,
}

impl Connection {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Feeds bytes read from the transport.
    ///
    /// Fails with [`FrameError::FrameTooLong`] when a record exceeds the
    /// configured limit; the client is told why and the caller should close
    /// the connection.
    pub fn on_frame(&mut self, bytes: &[u8]) -> Result<(), BrokerError> {
        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        let oversized = loop {
            match codec::decode_bounded(&self.buffer[consumed..], self.handle.max_frame_len) {
                Decoded::Frame(command, rest) => {
                    consumed = self.buffer.len() - rest.len();
                    self.handle.send(Request::Command {
                        session: self.session,
                        command,
                    })?;
                }
                Decoded::Malformed(frame, rest) => {
                    consumed = self.buffer.len() - rest.len();
                    self.handle.send(Request::Malformed {
                        session: self.session,
                        frame,
                    })?;
                }
                Decoded::Incomplete(rest) => {
                    consumed = self.buffer.len() - rest.len();
                    break false;
                }
                Decoded::Oversized => break true,
            }
        };

        if oversized {
            self.buffer.clear();
            let error = FrameError::FrameTooLong {
                limit: self.handle.max_frame_len,
            };
            self.handle.send(Request::Malformed {
                session: self.session,
                frame: MalformedFrame::new(None, error.clone()),
            })?;
            return Err(error.into());
        }
        self.buffer.drain(..consumed);
        Ok(())
    }

    /// Reports that the transport closed. Equivalent to dropping the connection.
    pub fn on_disconnect(mut self) {
        self.disconnect();
    }

    fn disconnect(&mut self) {
        if !self.disconnected {
            self.disconnected = true;
            let _ = self.handle.send(Request::Disconnect {
                session: self.session,
            });
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
