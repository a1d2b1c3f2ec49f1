//! WebSocket Provider Tests
//!
//! Tests for the network-socket provider:
//! - Connection facts on handshake, first envelope and close
//! - Manifest capture from `server/manifest`
//! - Text and binary frames pushed upward in order
//! - Transmit to a connected endpoint
//! - Unknown endpoints rejected

use deskhub_core::{ConnectionState, Envelope, ProviderKind};
use deskhub_transport::{
    provider_channel, ProviderEvent, ProviderEvents, TransportError, TransportProvider,
    WebSocketProvider,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut ProviderEvents) -> ProviderEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for provider event")
        .expect("provider channel closed")
}

/// Skip latency-only facts, which depend on timing
async fn next_non_latency_event(events: &mut ProviderEvents) -> ProviderEvent {
    loop {
        let event = next_event(events).await;
        match &event {
            ProviderEvent::Fact(fact) if fact.meta.is_some() => continue,
            _ => return event,
        }
    }
}

async fn start_provider() -> (std::sync::Arc<WebSocketProvider>, ProviderEvents, String) {
    let (sink, events) = provider_channel(ProviderKind::network_socket(), 64);
    let provider = WebSocketProvider::new(sink);
    let addr = provider.bind("127.0.0.1:0").await.expect("bind failed");
    (provider, events, format!("ws://{}", addr))
}

#[tokio::test]
async fn test_connect_reports_connected() {
    let (provider, mut events, url) = start_provider().await;
    let (_ws, _) = connect_async(url.as_str()).await.expect("connect failed");

    match next_non_latency_event(&mut events).await {
        ProviderEvent::Fact(fact) => {
            assert_eq!(fact.provider, ProviderKind::network_socket());
            assert_eq!(fact.state, ConnectionState::Connected);
            assert!(!fact.provider_id.is_empty());
        }
        other => panic!("expected Connected fact, got {:?}", other),
    }
    assert_eq!(provider.connection_count(), 1);
    provider.stop().await;
}

#[tokio::test]
async fn test_manifest_establishes_with_identity() {
    let (provider, mut events, url) = start_provider().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect failed");
    let _connected = next_non_latency_event(&mut events).await;

    let manifest = json!({
        "app": "server",
        "type": "manifest",
        "payload": {"name": "CarThing-1", "version": "0.11.0"}
    });
    ws.send(WsMessage::Text(manifest.to_string()))
        .await
        .expect("send failed");

    match next_non_latency_event(&mut events).await {
        ProviderEvent::Fact(fact) => {
            assert_eq!(fact.state, ConnectionState::Established);
            let manifest = fact.manifest.expect("manifest missing");
            assert_eq!(manifest.name, "CarThing-1");
        }
        other => panic!("expected Established fact, got {:?}", other),
    }

    match next_non_latency_event(&mut events).await {
        ProviderEvent::Data { data, .. } => {
            let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
            assert_eq!(value["type"], "manifest");
        }
        other => panic!("expected data, got {:?}", other),
    }
    provider.stop().await;
}

#[tokio::test]
async fn test_binary_frames_are_forwarded() {
    let (provider, mut events, url) = start_provider().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect failed");
    let _connected = next_non_latency_event(&mut events).await;

    ws.send(WsMessage::Binary(vec![1, 2, 3, 4]))
        .await
        .expect("send failed");

    match next_non_latency_event(&mut events).await {
        ProviderEvent::Binary { data, .. } => assert_eq!(&data[..], &[1, 2, 3, 4]),
        other => panic!("expected binary, got {:?}", other),
    }
    provider.stop().await;
}

#[tokio::test]
async fn test_transmit_reaches_endpoint() {
    let (provider, mut events, url) = start_provider().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect failed");

    let provider_id = match next_non_latency_event(&mut events).await {
        ProviderEvent::Fact(fact) => fact.provider_id,
        other => panic!("expected fact, got {:?}", other),
    };

    let envelope = Envelope::new("client", "pong").with_payload(json!("X"));
    provider
        .transmit(&provider_id, &envelope)
        .await
        .expect("transmit failed");

    let frame = loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("read failed");
        if let WsMessage::Text(text) = msg {
            break text;
        }
    };
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value, json!({"app": "client", "type": "pong", "payload": "X"}));
    provider.stop().await;
}

#[tokio::test]
async fn test_close_reports_disconnected() {
    let (provider, mut events, url) = start_provider().await;
    let (mut ws, _) = connect_async(url.as_str()).await.expect("connect failed");
    let _connected = next_non_latency_event(&mut events).await;

    ws.close(None).await.expect("close failed");

    match next_non_latency_event(&mut events).await {
        ProviderEvent::Fact(fact) => assert_eq!(fact.state, ConnectionState::Disconnected),
        other => panic!("expected Disconnected fact, got {:?}", other),
    }
    provider.stop().await;
}

#[tokio::test]
async fn test_transmit_to_unknown_endpoint() {
    let (provider, _events, _url) = start_provider().await;
    let err = provider
        .transmit("nope", &Envelope::new("client", "pong"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UnknownEndpoint(_)));
    provider.stop().await;
}
