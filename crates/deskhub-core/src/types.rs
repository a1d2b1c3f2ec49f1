//! Client, provider and connection types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::time::Timestamp;

/// Stable, opaque client identity
pub type ClientId = String;

/// App (plugin) identity
pub type AppId = String;

/// Transport kind a client can be reached through.
///
/// Kinds are open-ended: a new transport only needs a new name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKind(String);

impl ProviderKind {
    /// USB bridge (ADB) transport
    pub const USB_BRIDGE: &'static str = "adb";
    /// Network socket (WebSocket) transport
    pub const NETWORK_SOCKET: &'static str = "websocket";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn usb_bridge() -> Self {
        Self::new(Self::USB_BRIDGE)
    }

    pub fn network_socket() -> Self {
        Self::new(Self::NETWORK_SOCKET)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Connection lifecycle of a client or of one of its identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Established,
    Failed,
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Whether an identifier in this state can carry traffic
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Established
        )
    }

    /// Progress rank among live states; terminal states rank zero
    pub fn rank(&self) -> u8 {
        match self {
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Established => 3,
            ConnectionState::Failed | ConnectionState::Disconnected => 0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Established => "established",
            ConnectionState::Failed => "failed",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// One provider's handle on a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    /// Provider-local id (ADB serial, socket connection id, ...)
    pub provider_id: String,
    pub active: bool,
    pub state: ConnectionState,
    /// Last reported round-trip latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u32>,
}

/// Per-provider diagnostics. Display only, never used for routing
/// except through [`ProviderMeta::latency`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMeta {
    /// Socket-layer round trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_latency_ms: Option<u32>,
    /// Application-layer (ping/pong envelope) round trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_latency_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_bt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
}

impl ProviderMeta {
    /// Latency used for primary selection: socket first, then application layer
    pub fn latency(&self) -> Option<u32> {
        self.socket_latency_ms.or(self.app_latency_ms)
    }

    /// Overlay the fields present in `other`
    pub fn merge(&mut self, other: &ProviderMeta) {
        if other.socket_latency_ms.is_some() {
            self.socket_latency_ms = other.socket_latency_ms;
        }
        if other.app_latency_ms.is_some() {
            self.app_latency_ms = other.app_latency_ms;
        }
        if other.brightness.is_some() {
            self.brightness = other.brightness;
        }
        if other.battery.is_some() {
            self.battery = other.battery;
        }
        if other.mac_bt.is_some() {
            self.mac_bt = other.mac_bt.clone();
        }
        if other.offline.is_some() {
            self.offline = other.offline;
        }
    }
}

/// Endpoint-supplied descriptive metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Free-form device context (USID, services, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ClientManifest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Stable identity used to recognise the same device across providers:
    /// the explicit id when present, otherwise the name.
    pub fn identity(&self) -> Option<&str> {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => Some(id),
            _ if !self.name.is_empty() => Some(&self.name),
            _ => None,
        }
    }
}

/// The hub's logical view of one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub client_id: ClientId,
    pub identifiers: BTreeMap<ProviderKind, Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_provider: Option<ProviderKind>,
    pub connection_state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ClientManifest>,
    #[serde(default)]
    pub meta: BTreeMap<ProviderKind, ProviderMeta>,
    /// Time of the last state transition
    pub timestamp: Timestamp,
}

impl Client {
    pub fn new(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            identifiers: BTreeMap::new(),
            primary_provider: None,
            connection_state: ConnectionState::Disconnected,
            manifest: None,
            meta: BTreeMap::new(),
            timestamp: crate::time::now(),
        }
    }

    /// Whether any identifier is active
    pub fn is_active(&self) -> bool {
        self.identifiers.values().any(|i| i.active)
    }

    pub fn is_established(&self) -> bool {
        self.connection_state == ConnectionState::Established
    }

    pub fn active_identifiers(&self) -> impl Iterator<Item = (&ProviderKind, &Identifier)> {
        self.identifiers.iter().filter(|(_, i)| i.active)
    }

    /// The identifier sends go through, if any
    pub fn primary_identifier(&self) -> Option<(&ProviderKind, &Identifier)> {
        let kind = self.primary_provider.as_ref()?;
        self.identifiers
            .get_key_value(kind)
            .filter(|(_, identifier)| identifier.active)
    }

    pub fn manifest_identity(&self) -> Option<&str> {
        self.manifest.as_ref().and_then(ClientManifest::identity)
    }

    /// Display name: manifest name, falling back to the id
    pub fn display_name(&self) -> &str {
        match &self.manifest {
            Some(m) if !m.name.is_empty() => &m.name,
            _ => &self.client_id,
        }
    }
}

/// A provider's report about one endpoint connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionFact {
    pub provider: ProviderKind,
    pub provider_id: String,
    pub state: ConnectionState,
    /// Previously assigned client id, when the endpoint remembers one
    pub client_id: Option<ClientId>,
    pub manifest: Option<ClientManifest>,
    pub meta: Option<ProviderMeta>,
}

impl ConnectionFact {
    pub fn new(
        provider: ProviderKind,
        provider_id: impl Into<String>,
        state: ConnectionState,
    ) -> Self {
        Self {
            provider,
            provider_id: provider_id.into(),
            state,
            client_id: None,
            manifest: None,
            meta: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_manifest(mut self, manifest: ClientManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_meta(mut self, meta: ProviderMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}
