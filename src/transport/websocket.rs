//! WebSocket transport
//!
//! Carries the same line protocol as the TCP listener. Every inbound text or
//! binary message holds one or more records; a missing trailing newline is
//! added, so a record never spans two messages. Every outbound event is sent
//! as its own text message without the newline.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use std::net::SocketAddr;
use std::time::Duration;

use crate::broker::BrokerHandle;
use crate::session::Inbox;
use crate::utils::error::TransportError;

type WsSender = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Bounds each send and the final flush of a closing connection.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn start_websocket_server(
    addr: &str,
    broker: BrokerHandle,
) -> Result<(), TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve_websocket(listener, broker).await
}

pub async fn serve_websocket(
    listener: TcpListener,
    broker: BrokerHandle,
) -> Result<(), TransportError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept websocket connection");
                continue;
            }
        };
        spawn(handle_connection(stream, peer, broker.clone()));
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, broker: BrokerHandle) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };

    let (mut connection, inbox) = match broker.on_connect().await {
        Ok(opened) => opened,
        Err(e) => {
            warn!(%peer, error = %e, "refusing websocket connection");
            return;
        }
    };
    let session = connection.session();
    info!(%peer, %session, "websocket client connected");

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let closed = inbox.closed().wait();
    tokio::pin!(closed);
    let mut send_loop = spawn(send_events(ws_sender, inbox));
    let mut send_loop_done = false;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(msg)) if msg.is_text() || msg.is_binary() => {
                    let mut data = msg.into_data().to_vec();
                    if !data.ends_with(b"\n") {
                        data.push(b'\n');
                    }
                    if let Err(e) = connection.on_frame(&data) {
                        warn!(%session, error = %e, "closing websocket connection");
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%session, error = %e, "websocket read failed");
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
    if !send_loop_done
        && tokio::time::timeout(FLUSH_TIMEOUT, &mut send_loop).await.is_err()
    {
        debug!(%session, "flush timed out, dropping websocket");
        send_loop.abort();
    }
    info!(%peer, %session, "websocket client disconnected");
}

async fn send_events(mut ws_sender: WsSender, mut inbox: Inbox) {
    while let Some(event) = inbox.recv().await {
        let send = ws_sender.send(WsMessage::text(event.to_string()));
        match tokio::time::timeout(FLUSH_TIMEOUT, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "websocket send failed");
                return;
            }
            Err(_) => {
                debug!("websocket send timed out");
                return;
            }
        }
    }
    let _ = ws_sender.close().await;
}
