//! DeskHub Transport Layer
//!
//! The provider contract every transport implements, plus:
//! - the bounded provider → router event channel
//! - a network-socket provider over WebSocket (feature `websocket`, default)
//!
//! The USB bridge provider lives outside this crate; it only needs to report
//! [`deskhub_core::ConnectionFact`]s through a [`ProviderSink`].

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{
    provider_channel, ProviderEvent, ProviderEvents, ProviderSink, TransportProvider,
    DEFAULT_EVENT_CAPACITY,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketProvider};
