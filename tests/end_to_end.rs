use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use ssmp::broker::{Broker, BrokerHandle, BrokerPolicy, IdentityPolicy};
use ssmp::client::SsmpClient;
use ssmp::protocol::{ErrorCode, Event, Identity, Status, TopicName};
use ssmp::transport::{serve, serve_websocket};
use ssmp::utils::error::ClientError;

async fn start(policy: BrokerPolicy) -> (SocketAddr, SocketAddr, BrokerHandle) {
    let broker = BrokerHandle::spawn(Broker::new(policy));

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tcp_addr = tcp.local_addr().unwrap();
    tokio::spawn(serve(tcp, broker.clone()));

    let ws = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = ws.local_addr().unwrap();
    tokio::spawn(serve_websocket(ws, broker.clone()));

    (tcp_addr, ws_addr, broker)
}

async fn logged_in(addr: SocketAddr, identity: &str) -> SsmpClient {
    let mut client = SsmpClient::connect(addr).await.unwrap();
    client.login(identity).await.unwrap();
    client
}

async fn next_event(client: &mut SsmpClient) -> Event {
    tokio::time::timeout(Duration::from_secs(2), client.next_event())
        .await
        .expect("timed out waiting for an event")
        .unwrap()
}

fn presence(topic: &str, identity: &str, online: bool) -> Event {
    Event::Presence {
        topic: TopicName::new(topic).unwrap(),
        identity: Identity::new(identity).unwrap(),
        online,
    }
}

fn delivery(topic: &str, from: &str, payload: &str) -> Event {
    Event::Deliver {
        topic: TopicName::new(topic).unwrap(),
        from: Identity::new(from).unwrap(),
        payload: payload.to_string(),
    }
}

#[tokio::test]
async fn room_conversation_over_tcp() {
    let (addr, _, broker) = start(BrokerPolicy::default()).await;
    let mut alice = logged_in(addr, "alice").await;
    alice.subscribe("room1").await.unwrap();

    let mut bob = logged_in(addr, "bob").await;
    bob.subscribe("room1").await.unwrap();
    assert_eq!(next_event(&mut alice).await, presence("room1", "bob", true));

    bob.publish("room1", "hello").await.unwrap();
    assert_eq!(next_event(&mut alice).await, delivery("room1", "bob", "hello"));

    alice.publish("room1", "hi bob").await.unwrap();
    assert_eq!(next_event(&mut bob).await, delivery("room1", "alice", "hi bob"));

    // bob's own publish was never echoed back to him
    bob.ping().await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(100), bob.next_event())
            .await
            .is_err()
    );

    drop(bob);
    assert_eq!(next_event(&mut alice).await, presence("room1", "bob", false));

    let stats = broker.stats().await.unwrap();
    assert_eq!(stats.sessions, 1);
    assert_eq!(stats.topics, 1);
}

#[tokio::test]
async fn publishes_arrive_in_order() {
    let (addr, _, _broker) = start(BrokerPolicy::default()).await;
    let mut reader = logged_in(addr, "reader").await;
    reader.subscribe("feed").await.unwrap();
    let mut writer = logged_in(addr, "writer").await;

    for n in 0..50 {
        writer.publish("feed", &format!("message {n}")).await.unwrap();
    }
    for n in 0..50 {
        assert_eq!(
            next_event(&mut reader).await,
            delivery("feed", "writer", &format!("message {n}"))
        );
    }
}

#[tokio::test]
async fn errors_surface_as_rejections() {
    let (addr, _, _broker) = start(BrokerPolicy::default()).await;
    let mut anonymous = SsmpClient::connect(addr).await.unwrap();

    let err = anonymous.subscribe("room1").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            code: ErrorCode::NotAuthenticated,
            ..
        }
    ));

    let _alice = logged_in(addr, "alice").await;
    let err = anonymous.login("alice").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            code: ErrorCode::IdentityInUse,
            ..
        }
    ));
}

#[tokio::test]
async fn takeover_closes_previous_connection() {
    let policy = BrokerPolicy {
        identity: IdentityPolicy::Takeover,
        ..BrokerPolicy::default()
    };
    let (addr, _, _broker) = start(policy).await;
    let mut watcher = logged_in(addr, "watcher").await;
    watcher.subscribe("t").await.unwrap();
    let mut old = logged_in(addr, "alice").await;
    old.subscribe("t").await.unwrap();
    assert_eq!(next_event(&mut watcher).await, presence("t", "alice", true));

    let _new = logged_in(addr, "alice").await;

    assert_eq!(next_event(&mut watcher).await, presence("t", "alice", false));
    let closed = tokio::time::timeout(Duration::from_secs(2), old.next_event())
        .await
        .expect("old connection was not closed");
    assert!(matches!(closed, Err(ClientError::ConnectionClosed)));
}

#[tokio::test]
async fn websocket_and_tcp_clients_share_topics() {
    let (tcp_addr, ws_addr, _broker) = start(BrokerPolicy::default()).await;
    let mut tcp_client = logged_in(tcp_addr, "tcp-user").await;
    tcp_client.subscribe("mixed").await.unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{ws_addr}"))
        .await
        .expect("WebSocket handshake failed");
    ws.send(WsMessage::text("1 LOGIN ws-user\n2 PUBLISH mixed from the browser"))
        .await
        .unwrap();

    let mut replies = Vec::new();
    while replies.len() < 2 {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a reply")
            .expect("stream ended")
            .unwrap();
        replies.push(msg.into_text().unwrap().as_str().to_string());
    }
    assert_eq!(replies, vec!["1 OK", "2 OK"]);
    assert_eq!(
        next_event(&mut tcp_client).await,
        delivery("mixed", "ws-user", "from the browser")
    );
}

#[tokio::test]
async fn raw_malformed_records_get_protocol_errors() {
    let (addr, _, _broker) = start(BrokerPolicy::default()).await;
    let mut client = SsmpClient::connect(addr).await.unwrap();

    client.send_raw("9 FROB now").await.unwrap();
    client.send_raw("EVENT 1 PING").await.unwrap();

    for expected_seq in ["9", "*"] {
        match next_event(&mut client).await {
            Event::Reply {
                seq,
                status: Status::Error { code, .. },
            } => {
                assert_eq!(seq, expected_seq);
                assert_eq!(code, ErrorCode::ProtocolError);
            }
            other => panic!("expected a ProtocolError reply, got {other:?}"),
        }
    }

    // a valid command still works afterwards
    client.ping().await.unwrap();
}
