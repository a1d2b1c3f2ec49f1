//! Provider contract
//!
//! A provider owns the I/O for one transport kind. Upward it pushes
//! [`ProviderEvent`]s through a [`ProviderSink`]; downward the router calls
//! [`TransportProvider::transmit`] from its own writer tasks.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use deskhub_core::{
    ClientManifest, ConnectionFact, ConnectionState, Envelope, ProviderKind, ProviderMeta,
};
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// Default capacity of the provider → router channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events a provider pushes to the router
#[derive(Debug)]
pub enum ProviderEvent {
    /// Connection state or metadata changed for one endpoint
    Fact(ConnectionFact),
    /// A text frame (JSON envelope) arrived
    Data { provider_id: String, data: Bytes },
    /// A binary frame arrived
    Binary { provider_id: String, data: BytesMut },
    /// Provider-level failure, logged by the router
    Error(String),
}

/// Transport adapter
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Kind this provider reports facts under
    fn kind(&self) -> ProviderKind;

    /// Send an envelope to one endpoint
    async fn transmit(&self, provider_id: &str, envelope: &Envelope) -> Result<()>;

    /// Drop the connection to one endpoint
    async fn disconnect(&self, provider_id: &str) -> Result<()>;
}

/// Provider-side half of the event channel
#[derive(Clone, Debug)]
pub struct ProviderSink {
    kind: ProviderKind,
    tx: mpsc::Sender<ProviderEvent>,
}

impl ProviderSink {
    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    /// Push a raw event
    pub async fn push(&self, event: ProviderEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Report a fact
    pub async fn report(&self, fact: ConnectionFact) -> Result<()> {
        self.push(ProviderEvent::Fact(fact)).await
    }

    /// Report a bare state change for one endpoint
    pub async fn connection(&self, provider_id: &str, state: ConnectionState) -> Result<()> {
        self.report(ConnectionFact::new(self.kind.clone(), provider_id, state))
            .await
    }

    /// Report a state change with whatever identity and diagnostics are known
    pub async fn connection_with(
        &self,
        provider_id: &str,
        state: ConnectionState,
        manifest: Option<ClientManifest>,
        meta: Option<ProviderMeta>,
    ) -> Result<()> {
        let mut fact = ConnectionFact::new(self.kind.clone(), provider_id, state);
        fact.manifest = manifest;
        fact.meta = meta;
        self.report(fact).await
    }

    pub async fn data(&self, provider_id: &str, data: Bytes) -> Result<()> {
        self.push(ProviderEvent::Data {
            provider_id: provider_id.to_string(),
            data,
        })
        .await
    }

    pub async fn binary(&self, provider_id: &str, data: BytesMut) -> Result<()> {
        self.push(ProviderEvent::Binary {
            provider_id: provider_id.to_string(),
            data,
        })
        .await
    }

    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.push(ProviderEvent::Error(message.into())).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Router-side half of the event channel
#[derive(Debug)]
pub struct ProviderEvents {
    rx: mpsc::Receiver<ProviderEvent>,
}

impl ProviderEvents {
    /// Receive the next event, `None` once every sink is dropped
    pub async fn recv(&mut self) -> Option<ProviderEvent> {
        self.rx.recv().await
    }
}

/// Create a bounded provider → router channel
pub fn provider_channel(kind: ProviderKind, capacity: usize) -> (ProviderSink, ProviderEvents) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProviderSink { kind, tx }, ProviderEvents { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (sink, mut events) = provider_channel(ProviderKind::usb_bridge(), 8);

        sink.connection("serial-1", ConnectionState::Connecting)
            .await
            .unwrap();
        sink.data("serial-1", Bytes::from_static(b"{}")).await.unwrap();
        drop(sink);

        match events.recv().await {
            Some(ProviderEvent::Fact(fact)) => {
                assert_eq!(fact.provider, ProviderKind::usb_bridge());
                assert_eq!(fact.state, ConnectionState::Connecting);
            }
            other => panic!("expected fact, got {:?}", other),
        }
        assert!(matches!(
            events.recv().await,
            Some(ProviderEvent::Data { .. })
        ));
        assert!(events.recv().await.is_none());
    }
}
