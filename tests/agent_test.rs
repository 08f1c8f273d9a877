//! End-to-end: sink samples become signed envelopes on a live socket.

use cbsa_telemetry::collector::{MotionKind, MotionSample, TouchPhase};
use cbsa_telemetry::{Config, ConnectionState, TelemetryAgent};
use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

fn config_for(port: u16) -> Config {
    let mut config = Config::default();
    config.set_backend("127.0.0.1", port).unwrap();
    config.window_duration = Duration::from_millis(150);
    config.tick_period = Duration::from_millis(10);
    config.transport.reconnect_delay_ms = 20;
    config
}

/// First frame whose window carried a touch.
async fn next_touch_frame(server: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
    timeout(WAIT, async {
        loop {
            let msg = server.next().await.unwrap().unwrap();
            if !msg.is_text() {
                continue;
            }
            let frame: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            if frame["event_data"]["vector"][5].as_f64().unwrap_or(0.0) > 0.0 {
                break frame;
            }
        }
    })
    .await
    .expect("touch window arrived")
}

#[tokio::test]
async fn test_windows_stream_as_signed_envelopes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut agent = TelemetryAgent::new(config_for(port));
    agent.login("user-e2e").await;

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut server = accept_async(stream).await.unwrap();

    let sink = agent.sink();
    sink.on_screen_size(1080.0, 2400.0);
    sink.on_touch(TouchPhase::Start, 10.0, 10.0, 0.5, Some("send_money"));
    sink.on_touch(TouchPhase::End, 15.0, 15.0, 0.5, Some("send_money"));
    sink.on_motion(MotionKind::Accelerometer, MotionSample::new(0.0, 0.0, 1.0));

    let frame = next_touch_frame(&mut server).await;

    assert_eq!(frame["user_id"], "user-e2e");
    assert_eq!(frame["event_type"], "send_money");
    assert!(frame["session_id"].as_str().unwrap().starts_with("sess_"));

    let data = &frame["event_data"];
    let vector = data["vector"].as_array().unwrap();
    assert_eq!(vector.len(), 48);
    assert!(vector
        .iter()
        .all(|v| (0.0..=1.0).contains(&v.as_f64().unwrap())));

    let signature = data["signature"].as_str().unwrap();
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(data["nonce"].as_str().is_some());
    assert!(data["deviceInfo"].is_object());
    assert!(data.get("eventType").is_none());

    assert_eq!(agent.transport().state(), ConnectionState::Connected);
    let stats = agent.status().stats;
    assert_eq!(stats.touch_events, 2);
    assert!(stats.windows_completed >= 1);
    assert!(stats.envelopes_sent + stats.envelopes_queued >= stats.windows_completed);

    agent.logout();
    assert_eq!(agent.transport().state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_untagged_window_uses_configured_event_type() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut agent = TelemetryAgent::new(config_for(port));
    agent.login("user-e2e").await;

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut server = accept_async(stream).await.unwrap();

    let sink = agent.sink();
    sink.on_touch(TouchPhase::Start, 10.0, 10.0, 0.5, None);
    sink.on_touch(TouchPhase::End, 15.0, 15.0, 0.5, None);

    let frame = next_touch_frame(&mut server).await;
    assert_eq!(frame["event_type"], "BEHAVIORAL_VECTOR");

    agent.logout();
}
