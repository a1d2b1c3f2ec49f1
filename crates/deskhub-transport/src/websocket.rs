//! Network-socket provider over WebSocket
//!
//! Each accepted socket becomes one endpoint with a fresh provider id. Text
//! frames carry JSON envelopes, binary frames carry raw buffers (agent audio).
//! The provider reports:
//! - `Connected` once the WebSocket handshake completes
//! - `Established` on the first valid envelope, with the manifest when that
//!   envelope is `server/manifest`
//! - socket round-trip latency measured with WebSocket ping frames
//! - `Disconnected` when the socket closes

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use deskhub_core::{
    codec, time, ClientId, ClientManifest, ConnectionFact, ConnectionState,
    Envelope, ProviderKind, ProviderMeta, ServerType,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::traits::{ProviderSink, TransportProvider};

/// WebSocket provider configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Interval between latency probes
    pub ping_interval: Duration,
    /// Per-connection outbound frame buffer
    pub outbound_buffer: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            outbound_buffer: 256,
        }
    }
}

struct Connection {
    tx: mpsc::Sender<WsMessage>,
    addr: SocketAddr,
    state: Mutex<ConnectionState>,
    client_hint: Mutex<Option<ClientId>>,
}

/// Network-socket transport provider
pub struct WebSocketProvider {
    sink: ProviderSink,
    config: WebSocketConfig,
    connections: DashMap<String, Arc<Connection>>,
    running: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketProvider {
    pub fn new(sink: ProviderSink) -> Arc<Self> {
        Self::with_config(sink, WebSocketConfig::default())
    }

    pub fn with_config(sink: ProviderSink, config: WebSocketConfig) -> Arc<Self> {
        Arc::new(Self {
            sink,
            config,
            connections: DashMap::new(),
            running: AtomicBool::new(false),
            accept_task: Mutex::new(None),
        })
    }

    /// Bind a listener and start accepting in the background.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn bind(self: &Arc<Self>, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let local = listener.local_addr()?;
        info!("WebSocket provider listening on {}", local);

        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.accept_loop(listener).await });
        *self.accept_task.lock() = Some(handle);

        Ok(local)
    }

    /// Stop accepting and close every connection
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_task.lock().take() {
            handle.abort();
        }
        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.disconnect(&id).await;
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while self.running.load(Ordering::SeqCst) {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted TCP connection from {}", addr);
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle_stream(stream, addr).await });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    async fn handle_stream(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let provider_id = Uuid::new_v4().to_string();
        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::channel::<WsMessage>(self.config.outbound_buffer.max(1));

        let connection = Arc::new(Connection {
            tx: tx.clone(),
            addr,
            state: Mutex::new(ConnectionState::Connected),
            client_hint: Mutex::new(None),
        });
        self.connections
            .insert(provider_id.clone(), Arc::clone(&connection));
        info!("WebSocket endpoint {} connected from {}", provider_id, addr);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = write.send(msg).await {
                    debug!("WebSocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let interval = self.config.ping_interval;
        let pinger = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stamp = time::now().to_be_bytes().to_vec();
                if tx.send(WsMessage::Ping(stamp)).await.is_err() {
                    break;
                }
            }
        });

        if self
            .sink
            .connection(&provider_id, ConnectionState::Connected)
            .await
            .is_err()
        {
            warn!("Router gone, dropping WebSocket endpoint {}", provider_id);
        }

        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    self.on_text(&provider_id, &connection, Bytes::from(text.into_bytes()))
                        .await;
                }
                Ok(WsMessage::Binary(data)) => {
                    let _ = self
                        .sink
                        .binary(&provider_id, BytesMut::from(&data[..]))
                        .await;
                }
                Ok(WsMessage::Pong(stamp)) => {
                    self.on_pong(&provider_id, &connection, &stamp).await;
                }
                Ok(WsMessage::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    info!("WebSocket endpoint {} closed: {:?}", provider_id, reason);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket read error from {}: {}", connection.addr, e);
                    let _ = self
                        .sink
                        .error(format!("read error on {}: {}", provider_id, e))
                        .await;
                    break;
                }
            }
        }

        pinger.abort();
        self.connections.remove(&provider_id);
        drop(connection);
        writer.abort();

        let _ = self
            .sink
            .connection(&provider_id, ConnectionState::Disconnected)
            .await;
    }

    async fn on_text(&self, provider_id: &str, connection: &Connection, data: Bytes) {
        if let Ok(envelope) = codec::decode(&data) {
            if let Some(id) = envelope.client_id.clone() {
                *connection.client_hint.lock() = Some(id);
            }

            let manifest = manifest_from(&envelope);
            let promote = {
                let mut state = connection.state.lock();
                let promote = *state != ConnectionState::Established || manifest.is_some();
                *state = ConnectionState::Established;
                promote
            };

            if promote {
                let mut fact =
                    ConnectionFact::new(self.kind(), provider_id, ConnectionState::Established);
                fact.client_id = connection.client_hint.lock().clone();
                fact.manifest = manifest;
                let _ = self.sink.report(fact).await;
            }
        }

        let _ = self.sink.data(provider_id, data).await;
    }

    async fn on_pong(&self, provider_id: &str, connection: &Connection, stamp: &[u8]) {
        let Ok(raw) = <[u8; 8]>::try_from(stamp) else {
            return;
        };
        let sent = u64::from_be_bytes(raw);
        let rtt = time::now().saturating_sub(sent);
        let state = *connection.state.lock();
        if !state.is_live() {
            return;
        }

        let meta = ProviderMeta {
            socket_latency_ms: Some(rtt.min(u32::MAX as u64) as u32),
            ..Default::default()
        };
        let _ = self
            .sink
            .connection_with(provider_id, state, None, Some(meta))
            .await;
    }

    fn connection(&self, provider_id: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(provider_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::UnknownEndpoint(provider_id.to_string()))
    }
}

fn manifest_from(envelope: &Envelope) -> Option<ClientManifest> {
    if !envelope.is_server() || ServerType::parse(&envelope.kind) != Some(ServerType::Manifest) {
        return None;
    }
    envelope
        .payload
        .clone()
        .and_then(|payload| serde_json::from_value(payload).ok())
}

#[async_trait]
impl TransportProvider for WebSocketProvider {
    fn kind(&self) -> ProviderKind {
        self.sink.kind().clone()
    }

    async fn transmit(&self, provider_id: &str, envelope: &Envelope) -> Result<()> {
        let connection = self.connection(provider_id)?;
        let frame = codec::encode(envelope)?;
        let text =
            String::from_utf8(frame.to_vec()).map_err(|e| TransportError::Protocol(e.to_string()))?;
        connection
            .tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn disconnect(&self, provider_id: &str) -> Result<()> {
        let connection = self.connection(provider_id)?;
        connection
            .tx
            .send(WsMessage::Close(None))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_manifest_only_from_server_manifest() {
        let env = Envelope::new("server", "manifest").with_payload(json!({"name": "CarThing-1"}));
        assert_eq!(
            manifest_from(&env).map(|m| m.name),
            Some("CarThing-1".to_string())
        );

        let env = Envelope::new("weather", "manifest").with_payload(json!({"name": "x"}));
        assert!(manifest_from(&env).is_none());
    }
}
