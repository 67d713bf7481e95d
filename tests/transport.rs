//! Transport integration tests against a loopback WebSocket backend

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use vca_client::transport::{
    ConnectionEvent, ConnectionState, InboundMessage, Transport, TransportClient, TransportEvent,
};
use vca_client::voice::{AudioFrame, FRAME_BYTES};

mod common;

use common::{MockServer, Received, SilentServer, recv, transport_config};

/// Inbound message from the first connection
fn inbound(message: InboundMessage) -> TransportEvent {
    TransportEvent::Inbound {
        generation: 1,
        message,
    }
}

async fn connected_client(
    server: &MockServer,
) -> (
    TransportClient<TransportEvent>,
    mpsc::UnboundedReceiver<TransportEvent>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TransportClient::new(transport_config(&server.url), tx);
    client.connect();

    let event = recv(&mut rx).await;
    assert_eq!(
        event,
        TransportEvent::Connection(ConnectionEvent::Connected { generation: 1 })
    );
    assert_eq!(client.state(), ConnectionState::Connected);
    (client, rx)
}

#[tokio::test]
async fn test_session_start_is_first_message() {
    let mut server = MockServer::start().await;
    let (client, _rx) = connected_client(&server).await;

    client.send_audio(AudioFrame::new(0, vec![7; FRAME_BYTES]));
    client.send_audio(AudioFrame::new(1, vec![8; FRAME_BYTES]));

    let first = server.next().await;
    assert_eq!(first.control_type(), Some("session_start"));
    let Received::Text(start) = first else {
        unreachable!()
    };
    assert_eq!(start["device_id"], "test-device");
    assert!(start["timestamp"].as_str().unwrap().parse::<i64>().is_ok());

    // Raw frame bytes, one binary message per frame
    assert_eq!(server.next().await, Received::Binary(vec![7; FRAME_BYTES]));
    assert_eq!(server.next().await, Received::Binary(vec![8; FRAME_BYTES]));
}

#[tokio::test]
async fn test_connect_is_noop_when_connected() {
    let mut server = MockServer::start().await;
    let (mut client, mut rx) = connected_client(&server).await;

    client.connect();
    assert_eq!(client.generation(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);

    assert_eq!(server.next().await.control_type(), Some("session_start"));
    assert!(server.drain(Duration::from_millis(200)).await.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_double_disconnect_sends_one_session_end() {
    let mut server = MockServer::start().await;
    let (mut client, _rx) = connected_client(&server).await;
    assert_eq!(server.next().await.control_type(), Some("session_start"));

    client.disconnect("user_ended").await;
    client.disconnect("user_ended").await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let end = server.next().await;
    assert_eq!(end.control_type(), Some("session_end"));
    let Received::Text(end) = end else {
        unreachable!()
    };
    assert_eq!(end["reason"], "user_ended");

    let rest = server.drain(Duration::from_millis(300)).await;
    assert_eq!(rest, vec![Received::Close]);

    // Audio after disconnect goes nowhere
    client.send_audio(AudioFrame::silence(5));
    assert!(server.drain(Duration::from_millis(200)).await.is_empty());
}

#[tokio::test]
async fn test_inbound_messages_in_arrival_order() {
    let server = MockServer::start().await;
    let (_client, mut rx) = connected_client(&server).await;

    server.send(Message::Text(r#"{"type":"transcript","text":"what time is it"}"#.into()));
    server.send(Message::Text("not json at all".into()));
    server.send(Message::Binary(vec![0xFF, 0xFB, 0x90, 0x00]));
    server.send(Message::Text(r#"{"type":"status","status":"done"}"#.into()));

    assert_eq!(
        recv(&mut rx).await,
        inbound(InboundMessage::TextEvent(
            r#"{"type":"transcript","text":"what time is it"}"#.into()
        ))
    );
    // The malformed message is dropped without closing the connection
    assert_eq!(
        recv(&mut rx).await,
        inbound(InboundMessage::AudioChunk(vec![0xFF, 0xFB, 0x90, 0x00]))
    );
    assert_eq!(
        recv(&mut rx).await,
        inbound(InboundMessage::TextEvent(
            r#"{"type":"status","status":"done"}"#.into()
        ))
    );
}

#[tokio::test]
async fn test_server_close_is_a_failure() {
    let server = MockServer::start().await;
    let (client, mut rx) = connected_client(&server).await;

    server.close();

    let event = recv(&mut rx).await;
    assert!(matches!(
        event,
        TransportEvent::Connection(ConnectionEvent::Failed { generation: 1, .. })
    ));
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_reconnect_after_disconnect_is_a_new_generation() {
    let mut server = MockServer::start().await;
    let (mut client, mut rx) = connected_client(&server).await;
    client.disconnect("user_ended").await;

    client.connect();
    let event = recv(&mut rx).await;
    let TransportEvent::Connection(ConnectionEvent::Connected { generation }) = event else {
        panic!("expected connected, got {event:?}");
    };
    assert!(generation > 1);
    assert_eq!(generation, client.generation());

    let controls: Vec<_> = server
        .drain(Duration::from_millis(500))
        .await
        .into_iter()
        .filter_map(|r| r.control_type().map(ToString::to_string))
        .collect();
    assert_eq!(controls, vec!["session_start", "session_end", "session_start"]);
}

#[tokio::test]
async fn test_unanswered_ping_fails_connection() {
    // Never reads, so no pong is ever written back
    let server = SilentServer::start().await;
    let mut config = transport_config(&server.url);
    config.ping_interval = Duration::from_millis(200);
    config.pong_timeout = Duration::from_millis(300);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TransportClient::<TransportEvent>::new(config, tx);
    client.connect();

    assert_eq!(
        recv(&mut rx).await,
        TransportEvent::Connection(ConnectionEvent::Connected { generation: 1 })
    );

    let event = recv(&mut rx).await;
    let TransportEvent::Connection(ConnectionEvent::Failed { generation, reason }) = event else {
        panic!("expected failure, got {event:?}");
    };
    assert_eq!(generation, 1);
    assert!(reason.contains("ping timeout"), "reason: {reason}");
    assert_eq!(client.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_answered_pings_keep_connection_open() {
    let server = MockServer::start().await;
    let mut config = transport_config(&server.url);
    config.ping_interval = Duration::from_millis(100);
    config.pong_timeout = Duration::from_millis(300);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TransportClient::<TransportEvent>::new(config, tx);
    client.connect();
    assert!(matches!(
        recv(&mut rx).await,
        TransportEvent::Connection(ConnectionEvent::Connected { .. })
    ));

    // Several ping rounds, each answered
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_during_handshake_still_ends_session() {
    let mut server = MockServer::start().await;
    let (tx, _rx) = mpsc::unbounded_channel::<TransportEvent>();
    let mut client = TransportClient::new(transport_config(&server.url), tx);

    client.connect();
    assert_eq!(client.state(), ConnectionState::Connecting);
    client.disconnect("user_ended").await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let controls: Vec<_> = server
        .drain(Duration::from_millis(300))
        .await
        .into_iter()
        .filter_map(|r| r.control_type().map(ToString::to_string))
        .collect();
    assert_eq!(controls, vec!["session_start", "session_end"]);
}
