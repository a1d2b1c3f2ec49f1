//! Envelope definitions and the decode boundary
//!
//! An [`Envelope`] is the loose wire shape. Before anything is dispatched it
//! is classified into a [`Destination`]; server-bound envelopes must name one
//! of the closed set of [`ServerType`]s, anything else is malformed.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::ClientId;
use crate::SERVER_APP;

/// Typed message unit exchanged between providers, the router and apps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub app: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl Envelope {
    pub fn new(app: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            kind: kind.into(),
            request: None,
            payload: None,
            client_id: None,
        }
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_client(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn is_server(&self) -> bool {
        self.app == SERVER_APP
    }

    pub fn request(&self) -> Option<&str> {
        self.request.as_deref()
    }

    /// Check the fields every envelope needs
    pub fn validate(&self) -> Result<()> {
        if self.app.trim().is_empty() {
            return Err(Error::MalformedEnvelope("missing app".into()));
        }
        if self.kind.trim().is_empty() {
            return Err(Error::MalformedEnvelope(format!(
                "missing type (app {})",
                self.app
            )));
        }
        Ok(())
    }

    /// Classify the envelope for dispatch
    pub fn destination(&self) -> Result<Destination> {
        self.validate()?;
        if self.is_server() {
            ServerType::parse(&self.kind)
                .map(Destination::Server)
                .ok_or_else(|| {
                    Error::MalformedEnvelope(format!("unknown server type '{}'", self.kind))
                })
        } else {
            Ok(Destination::App(self.app.clone()))
        }
    }
}

/// Binary counterpart of [`Envelope`]; the buffer is owned, never shared
#[derive(Debug, PartialEq)]
pub struct BinaryEnvelope {
    pub app: String,
    pub kind: String,
    pub request: Option<String>,
    pub client_id: Option<ClientId>,
    pub data: BytesMut,
}

impl BinaryEnvelope {
    pub fn new(app: impl Into<String>, kind: impl Into<String>, data: BytesMut) -> Self {
        Self {
            app: app.into(),
            kind: kind.into(),
            request: None,
            client_id: None,
            data,
        }
    }

    /// Raw audio frame from a device
    pub fn audio(client_id: impl Into<ClientId>, data: BytesMut) -> Self {
        Self {
            app: SERVER_APP.to_string(),
            kind: ServerType::Audio.as_str().to_string(),
            request: Some("binary".to_string()),
            client_id: Some(client_id.into()),
            data,
        }
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    pub fn with_client(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Header fields as a payload-less envelope
    pub fn header(&self) -> Envelope {
        Envelope {
            app: self.app.clone(),
            kind: self.kind.clone(),
            request: self.request.clone(),
            payload: None,
            client_id: self.client_id.clone(),
        }
    }

    /// Same header, independently allocated buffer
    pub fn deep_copy(&self) -> Self {
        Self {
            app: self.app.clone(),
            kind: self.kind.clone(),
            request: self.request.clone(),
            client_id: self.client_id.clone(),
            data: BytesMut::from(&self.data[..]),
        }
    }

    pub fn destination(&self) -> Result<Destination> {
        self.header().destination()
    }
}

/// Where a classified envelope goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A server subsystem, by type
    Server(ServerType),
    /// A running app, by id
    App(String),
}

/// Closed set of server-bound envelope types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    Ping,
    Pong,
    Manifest,
    Config,
    Get,
    Log,
    Audio,
    Action,
    View,
}

impl ServerType {
    pub const ALL: [ServerType; 9] = [
        ServerType::Ping,
        ServerType::Pong,
        ServerType::Manifest,
        ServerType::Config,
        ServerType::Get,
        ServerType::Log,
        ServerType::Audio,
        ServerType::Action,
        ServerType::View,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Ping => "ping",
            ServerType::Pong => "pong",
            ServerType::Manifest => "manifest",
            ServerType::Config => "config",
            ServerType::Get => "get",
            ServerType::Log => "log",
            ServerType::Audio => "audio",
            ServerType::Action => "action",
            ServerType::View => "view",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent session-control requests a device sends with `server/audio`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRequest {
    Start,
    End,
    /// Clear the conversation channel
    Clear,
    /// Fetch conversation history
    Fetch,
    /// Delete one message
    Delete,
}

impl AgentRequest {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(AgentRequest::Start),
            "end" => Some(AgentRequest::End),
            "clear" => Some(AgentRequest::Clear),
            "fetch" => Some(AgentRequest::Fetch),
            "delete" => Some(AgentRequest::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRequest::Start => "start",
            AgentRequest::End => "end",
            AgentRequest::Clear => "clear",
            AgentRequest::Fetch => "fetch",
            AgentRequest::Delete => "delete",
        }
    }
}

/// Replies an agent app sends back towards a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentReply {
    Response,
    Context,
    Token,
    /// Ask the device to close its microphone
    Disconnect,
}

impl AgentReply {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "response" => Some(AgentReply::Response),
            "context" => Some(AgentReply::Context),
            "token" => Some(AgentReply::Token),
            "disconnect" => Some(AgentReply::Disconnect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentReply::Response => "response",
            AgentReply::Context => "context",
            AgentReply::Token => "token",
            AgentReply::Disconnect => "disconnect",
        }
    }
}
