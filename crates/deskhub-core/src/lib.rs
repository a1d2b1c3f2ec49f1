//! DeskHub Core
//!
//! Core types and envelope encoding shared by every DeskHub crate.
//!
//! This crate provides:
//! - The logical client record ([`Client`], [`Identifier`], [`ConnectionState`])
//! - Transport identities ([`ProviderKind`]) and their diagnostics ([`ProviderMeta`])
//! - The wire envelope ([`Envelope`], [`BinaryEnvelope`]) and its decode
//!   boundary ([`Destination`], [`ServerType`], [`AgentRequest`])
//! - JSON framing ([`codec`])
//! - Timing helpers ([`time`])

pub mod codec;
pub mod envelope;
pub mod error;
pub mod time;
pub mod types;

pub use codec::{decode, encode};
pub use envelope::{AgentReply, AgentRequest, BinaryEnvelope, Destination, Envelope, ServerType};
pub use error::{Error, Result};
pub use time::Timestamp;
pub use types::*;

/// App name that marks an envelope as addressed to (or sent by) the hub itself
pub const SERVER_APP: &str = "server";

/// App name used for envelopes the hub addresses to the device runtime
pub const CLIENT_APP: &str = "client";

/// Default WebSocket port for the network-socket provider
pub const DEFAULT_WS_PORT: u16 = 8891;
