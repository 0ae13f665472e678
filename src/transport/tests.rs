use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::broker::{Broker, BrokerHandle, BrokerPolicy};
use crate::client::SsmpClient;
use crate::transport::{serve, serve_websocket};

async fn tcp_server(policy: BrokerPolicy) -> (SocketAddr, BrokerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = BrokerHandle::spawn(Broker::new(policy));
    tokio::spawn(serve(listener, broker.clone()));
    (addr, broker)
}

async fn ws_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let broker = BrokerHandle::spawn(Broker::default());
    tokio::spawn(serve_websocket(listener, broker));
    addr
}

struct LineClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }
}

#[tokio::test]
async fn test_tcp_room_scenario() {
    let (addr, _broker) = tcp_server(BrokerPolicy::default()).await;
    let mut alice = LineClient::connect(addr).await;
    let mut bob = LineClient::connect(addr).await;

    alice.send("1 LOGIN alice\n2 SUBSCRIBE room1\n").await;
    assert_eq!(alice.line().await.as_deref(), Some("1 OK"));
    assert_eq!(alice.line().await.as_deref(), Some("2 OK"));

    bob.send("1 LOGIN bob\n2 SUBSCRIBE room1\n3 PUBLISH room1 hello there\n")
        .await;
    assert_eq!(bob.line().await.as_deref(), Some("1 OK"));
    assert_eq!(bob.line().await.as_deref(), Some("2 OK"));
    assert_eq!(bob.line().await.as_deref(), Some("3 OK"));
    assert_eq!(
        alice.line().await.as_deref(),
        Some("PRESENCE room1 bob ONLINE")
    );
    assert_eq!(
        alice.line().await.as_deref(),
        Some("EVENT room1 bob hello there")
    );

    drop(bob);
    assert_eq!(
        alice.line().await.as_deref(),
        Some("PRESENCE room1 bob OFFLINE")
    );
}

#[tokio::test]
async fn test_tcp_record_split_across_writes() {
    let (addr, _broker) = tcp_server(BrokerPolicy::default()).await;
    let mut client = LineClient::connect(addr).await;

    client.send("7 PI").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.send("NG\r\n8 NOPE\n").await;

    assert_eq!(client.line().await.as_deref(), Some("PONG"));
    assert_eq!(
        client.line().await.as_deref(),
        Some("8 ERROR ProtocolError unknown verb NOPE")
    );
}

#[tokio::test]
async fn test_tcp_oversized_record_closes_connection() {
    let policy = BrokerPolicy {
        max_frame_len: 32,
        ..BrokerPolicy::default()
    };
    let (addr, broker) = tcp_server(policy).await;
    let mut client = LineClient::connect(addr).await;

    client.send(&format!("1 PUBLISH t {}\n", "x".repeat(64))).await;

    assert_eq!(
        client.line().await.as_deref(),
        Some("* ERROR ProtocolError frame exceeds 32 bytes")
    );
    assert_eq!(client.line().await, None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.stats().await.unwrap().sessions, 0);
}

#[tokio::test]
async fn test_tcp_stalled_reader_is_disconnected() {
    let policy = BrokerPolicy {
        max_queue_len: 4,
        ..BrokerPolicy::default()
    };
    let (addr, broker) = tcp_server(policy).await;

    // logs in and subscribes, then never reads again
    let mut stalled = LineClient::connect(addr).await;
    stalled.send("1 LOGIN stalled\n2 SUBSCRIBE t\n").await;
    assert_eq!(stalled.line().await.as_deref(), Some("1 OK"));
    assert_eq!(stalled.line().await.as_deref(), Some("2 OK"));

    let mut publisher = SsmpClient::connect(addr).await.unwrap();
    publisher.login("publisher").await.unwrap();
    let payload = "x".repeat(60_000);
    let mut overflowed = false;
    for _ in 0..2_000 {
        publisher.publish("t", &payload).await.unwrap();
        if broker.stats().await.unwrap().sessions == 1 {
            overflowed = true;
            break;
        }
    }
    assert!(overflowed, "stalled session was never closed");

    // once the flush deadline passes the server drops the socket, so writes
    // start failing
    let mut write_failed = false;
    for _ in 0..40 {
        if stalled.writer.write_all(b"3 PING\n").await.is_err() {
            write_failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert!(write_failed, "server kept the stalled socket open");
}

#[tokio::test]
async fn test_tcp_connection_limit_refuses_extra_clients() {
    let policy = BrokerPolicy {
        max_connections: 1,
        ..BrokerPolicy::default()
    };
    let (addr, _broker) = tcp_server(policy).await;
    let mut first = LineClient::connect(addr).await;
    first.send("1 PING\n").await;
    assert_eq!(first.line().await.as_deref(), Some("PONG"));

    let mut second = LineClient::connect(addr).await;
    assert_eq!(second.line().await, None);
}

#[tokio::test]
async fn test_websocket_carries_line_protocol() {
    let addr = ws_server().await;
    let (mut alice, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("WebSocket handshake failed");
    let (mut bob, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("WebSocket handshake failed");

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        msg.into_text().unwrap().as_str().to_string()
    }

    // several records in one message, the last one without its newline
    alice
        .send(WsMessage::text("1 LOGIN alice\n2 SUBSCRIBE news"))
        .await
        .unwrap();
    assert_eq!(next_text(&mut alice).await, "1 OK");
    assert_eq!(next_text(&mut alice).await, "2 OK");

    bob.send(WsMessage::text("1 LOGIN bob")).await.unwrap();
    assert_eq!(next_text(&mut bob).await, "1 OK");
    bob.send(WsMessage::binary(b"2 PUBLISH news  spaced out\n".to_vec()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut bob).await, "2 OK");
    assert_eq!(next_text(&mut alice).await, "EVENT news bob  spaced out");
}
