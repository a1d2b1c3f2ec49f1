//! Server subsystems
//!
//! - [`core`]: ping, manifest, initial data and device logs (always installed)
//! - [`profile`]: pushes the active profile to devices
//! - [`agent`]: voice-agent audio fan-out and session control

pub mod agent;
pub mod core;
pub mod profile;

pub use agent::AgentFanout;
pub use profile::{Profile, ProfileSynchronizer};
