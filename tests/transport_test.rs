//! Integration tests for the WebSocket transport against an in-process server.

use cbsa_telemetry::transport::{
    ConnectionState, InboundStatus, SendStatus, Transport, TransportConfig,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

fn config_for(addr: std::net::SocketAddr) -> TransportConfig {
    TransportConfig {
        url: format!("ws://{addr}/ws/behaviour"),
        reconnect_delay: Duration::from_millis(20),
        max_reconnect_attempts: 5,
        backoff_cap: 5,
        queue_size: 100,
        connection_timeout: Duration::from_secs(2),
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("client connected")
        .expect("accept");
    accept_async(stream).await.expect("handshake")
}

async fn next_json(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("frame arrived")
            .expect("stream open")
            .expect("valid frame");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

async fn wait_for_state(transport: &Transport, want: ConnectionState) {
    let mut rx = transport.subscribe();
    timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("never reached {want}"))
        .unwrap();
}

#[tokio::test]
async fn test_queued_messages_flush_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transport = Transport::new(config_for(listener.local_addr().unwrap()));
    transport.set_user_id(Some("user-42".to_string()));

    for n in 1..=3 {
        let status = transport.send_event("BEHAVIORAL_VECTOR", json!({ "n": n }));
        assert_eq!(status, SendStatus::Queued);
    }

    let mut server = accept(&listener).await;
    let mut order = Vec::new();
    for _ in 0..3 {
        let frame = next_json(&mut server).await;
        assert_eq!(frame["user_id"], "user-42");
        assert_eq!(frame["session_id"], transport.session_id());
        assert_eq!(frame["event_type"], "BEHAVIORAL_VECTOR");
        order.push(frame["event_data"]["n"].as_i64().unwrap());
    }

    assert_eq!(order, vec![1, 2, 3]);
    wait_for_state(&transport, ConnectionState::Connected).await;
    assert_eq!(transport.queued_len(), 0);
    transport.disconnect();
}

#[tokio::test]
async fn test_send_while_connected_reports_sent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transport = Transport::new(config_for(listener.local_addr().unwrap()));

    transport.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&transport, ConnectionState::Connected).await;

    assert_eq!(transport.send(&json!({ "ping": true })), SendStatus::Sent);
    let frame = next_json(&mut server).await;
    assert_eq!(frame["ping"], true);

    transport.disconnect();
}

#[tokio::test]
async fn test_inbound_messages_reach_handler_and_garbage_is_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transport = Transport::new(config_for(listener.local_addr().unwrap()));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    transport.on_message(move |msg| {
        let _ = tx.send(msg);
    });

    transport.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&transport, ConnectionState::Connected).await;

    server.send(Message::Text("not json".into())).await.unwrap();
    server
        .send(Message::Text(
            r#"{"status":"error","message":"bad vector","errors":["length"]}"#.into(),
        ))
        .await
        .unwrap();
    server
        .send(Message::Text(r#"{"status":"received","message_id":7}"#.into()))
        .await
        .unwrap();

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.status, InboundStatus::Error);
    assert_eq!(first.message.as_deref(), Some("bad vector"));

    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.status, InboundStatus::Received);
    assert_eq!(second.message_id, Some(json!(7)));

    // The malformed frame did not take the connection down
    assert_eq!(transport.state(), ConnectionState::Connected);
    transport.send(&json!({ "after": "garbage" }));
    assert_eq!(next_json(&mut server).await["after"], "garbage");

    transport.disconnect();
}

#[tokio::test]
async fn test_reconnects_after_server_drop_and_delivers_queue() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transport = Transport::new(config_for(listener.local_addr().unwrap()));

    transport.connect();
    let server = accept(&listener).await;
    wait_for_state(&transport, ConnectionState::Connected).await;

    drop(server);
    let mut rx = transport.subscribe();
    timeout(WAIT, rx.wait_for(|s| !s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    transport.send_event("BEHAVIORAL_VECTOR", json!({ "n": 99 }));

    let mut server = accept(&listener).await;
    let frame = next_json(&mut server).await;
    assert_eq!(frame["event_data"]["n"], 99);
    wait_for_state(&transport, ConnectionState::Connected).await;

    transport.disconnect();
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = config_for(addr);
    config.max_reconnect_attempts = 2;
    let transport = Transport::new(config);

    transport.connect();
    wait_for_state(&transport, ConnectionState::Exhausted).await;

    // Exhausted transports only queue until told to connect again
    assert_eq!(transport.send(&json!({ "n": 1 })), SendStatus::Queued);
    assert_eq!(transport.state(), ConnectionState::Exhausted);
    assert_eq!(transport.queued_len(), 1);
}

#[tokio::test]
async fn test_disconnect_is_terminal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let transport = Transport::new(config_for(listener.local_addr().unwrap()));

    transport.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&transport, ConnectionState::Connected).await;

    transport.disconnect();
    assert_eq!(transport.state(), ConnectionState::Closed);

    // The server sees the socket close
    let end = timeout(WAIT, async {
        loop {
            match server.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());

    // No automatic reconnect follows
    let again = timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(again.is_err());
    assert_eq!(transport.state(), ConnectionState::Closed);
}
