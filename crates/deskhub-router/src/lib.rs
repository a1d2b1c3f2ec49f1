//! DeskHub Router
//!
//! The hub between devices and apps:
//! - Reconciles provider facts into one client per device ([`ClientRegistry`])
//! - Picks the primary provider for every outbound send
//! - Routes device envelopes to server subsystems or app inboxes
//! - Applies drop-oldest backpressure per app and per client
//!
//! # Example
//!
//! ```no_run
//! use deskhub_router::{Router, RouterConfig};
//! use deskhub_transport::WebSocketProvider;
//! use deskhub_core::ProviderKind;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new(RouterConfig::default());
//!
//!     let (sink, events) = router.provider_channel(ProviderKind::network_socket());
//!     let provider = WebSocketProvider::new(sink);
//!     provider.bind("0.0.0.0:8891").await?;
//!     router.attach_provider(provider, events)?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod inbox;
pub mod queue;
pub mod registry;
pub mod router;
pub mod services;
pub mod subscription;

pub use error::{Result, RouterError};
pub use inbox::{AppDelivery, AppInbox};
pub use queue::BoundedQueue;
pub use registry::{select_primary, ClientChange, ClientRegistry, ClientUpdate, RegistryConfig};
pub use router::{
    AppAuthorizer, AppRequestHandler, BinaryReceived, DataReceived, Router, RouterConfig,
    SendOutcome, ServerSubsystem, TransmitFailure, WeakRouter,
};
pub use services::{AgentFanout, Profile, ProfileSynchronizer};
pub use subscription::{SubscriptionHandle, Topic};
