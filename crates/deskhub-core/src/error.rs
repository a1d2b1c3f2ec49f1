//! Error types for DeskHub

use thiserror::Error;

/// Result type alias for DeskHub core operations
pub type Result<T> = std::result::Result<T, Error>;

/// DeskHub error taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Client unknown or no active primary provider at send time
    #[error("no route to client {0}")]
    NoRoute(String),

    /// Envelope from or to an app outside a required allow-list
    #[error("app {app} is not authorized for {kind} traffic")]
    Unauthorized { app: String, kind: String },

    /// Missing required fields or an unknown (app, type) combination
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The transport rejected or failed a send
    #[error("provider {provider} failed to transmit: {reason}")]
    ProviderTransmitFailure { provider: String, reason: String },

    /// A fact could belong to more than one existing client
    #[error("identity for {provider}:{provider_id} matches {candidates} clients")]
    IdentityReconciliationAmbiguous {
        provider: String,
        provider_id: String,
        candidates: usize,
    },

    /// JSON encoding error
    #[error("encode error: {0}")]
    Encode(String),

    /// JSON decoding error
    #[error("decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Recoverable errors may succeed on the next relevant event
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NoRoute(_) | Error::ProviderTransmitFailure { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            Error::Decode(e.to_string())
        } else {
            Error::Encode(e.to_string())
        }
    }
}
