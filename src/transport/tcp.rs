//! Raw TCP transport
//!
//! Each accepted socket is split in two. The read half feeds bytes into the
//! session's [`Connection`]; a spawned send loop drains the session's
//! [`Inbox`] and writes one encoded record per event. Whichever side stops
//! first ends the connection, and the session is always disconnected on the
//! way out.
//!
//! A session the broker closes on its own, on queue overflow for instance,
//! stops the read loop straight away. Queued events then get `FLUSH_TIMEOUT`
//! to reach the socket before the send loop is aborted, so a peer that never
//! reads cannot pin the socket open.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tracing::{debug, info, warn};

use crate::broker::BrokerHandle;
use crate::protocol::codec;
use crate::session::Inbox;
use crate::utils::error::TransportError;

const READ_CHUNK: usize = 8 * 1024;

/// How long a closing connection waits for queued events to reach the socket.
/// Also bounds each individual write.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn start_tcp_server(addr: &str, broker: BrokerHandle) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!("SSMP server listening on tcp://{}", listener.local_addr()?);
    serve(listener, broker).await
}

/// Accepts connections on an already bound listener until the task is
/// cancelled.
pub async fn serve(listener: TcpListener, broker: BrokerHandle) -> Result<(), TransportError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept tcp connection");
                continue;
            }
        };
        spawn(handle_connection(stream, peer, broker.clone()));
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, broker: BrokerHandle) {
    let (mut connection, inbox) = match broker.on_connect().await {
        Ok(opened) => opened,
        Err(e) => {
            warn!(%peer, error = %e, "refusing tcp connection");
            return;
        }
    };
    let session = connection.session();
    info!(%peer, %session, "tcp client connected");

    let (mut reader, writer) = stream.into_split();
    let closed = inbox.closed().wait();
    tokio::pin!(closed);
    let mut send_loop = spawn(send_events(writer, inbox));
    let mut send_loop_done = false;
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = connection.on_frame(&buf[..n]) {
                        warn!(%session, error = %e, "closing tcp connection");
                        break;
                    }
                }
                Err(e) => {
                    debug!(%session, error = %e, "tcp read failed");
                    break;
                }
            },
            _ = &mut send_loop => {
                send_loop_done = true;
                break;
            }
            _ = &mut closed => {
                debug!(%session, "session closed by broker");
                break;
            }
        }
    }

    connection.on_disconnect();
    // the broker closes the inbox once the disconnect is applied
    if !send_loop_done
        && tokio::time::timeout(FLUSH_TIMEOUT, &mut send_loop).await.is_err()
    {
        debug!(%session, "flush timed out, dropping socket");
        send_loop.abort();
    }
    info!(%peer, %session, "tcp client disconnected");
}

async fn send_events(mut writer: OwnedWriteHalf, mut inbox: Inbox) {
    while let Some(event) = inbox.recv().await {
        let record = codec::encode(&event);
        match tokio::time::timeout(FLUSH_TIMEOUT, writer.write_all(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "tcp write failed");
                return;
            }
            Err(_) => {
                debug!("tcp write timed out");
                return;
            }
        }
    }
    let _ = writer.shutdown().await;
}
