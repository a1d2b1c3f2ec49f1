//! Hub configuration file

use anyhow::{bail, Context, Result};
use deskhub_core::{ProviderKind, DEFAULT_WS_PORT};
use deskhub_router::{Profile, RegistryConfig, RouterConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, every section optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub router: RouterSection,
    pub websocket: WebSocketSection,
    pub agent: AgentSection,
    /// Profile activated at startup
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub name: String,
    pub app_queue_capacity: usize,
    pub outbound_queue_capacity: usize,
    pub provider_channel_capacity: usize,
    pub grace_period_ms: u64,
    pub provider_priority: Vec<String>,
}

impl Default for RouterSection {
    fn default() -> Self {
        let defaults = RouterConfig::default();
        Self {
            name: defaults.name,
            app_queue_capacity: defaults.app_queue_capacity,
            outbound_queue_capacity: defaults.outbound_queue_capacity,
            provider_channel_capacity: defaults.provider_channel_capacity,
            grace_period_ms: defaults.registry.grace_period.as_millis() as u64,
            provider_priority: defaults
                .registry
                .provider_priority
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketSection {
    pub listen: SocketAddr,
    pub ping_interval_ms: u64,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WS_PORT)),
            ping_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Apps allowed to receive device audio
    pub allow_list: Vec<String>,
}

impl HubConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: HubConfig =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.websocket.ping_interval_ms == 0 {
            bail!("websocket.ping_interval_ms must be at least 1");
        }
        self.router_config()
            .validate()
            .context("invalid [router] section")?;
        Ok(())
    }

    pub fn router_config(&self) -> RouterConfig {
        let router = &self.router;
        RouterConfig {
            name: router.name.clone(),
            app_queue_capacity: router.app_queue_capacity,
            outbound_queue_capacity: router.outbound_queue_capacity,
            provider_channel_capacity: router.provider_channel_capacity,
            registry: RegistryConfig {
                grace_period: Duration::from_millis(router.grace_period_ms),
                provider_priority: router
                    .provider_priority
                    .iter()
                    .map(|k| ProviderKind::new(k.trim()))
                    .collect(),
            },
        }
    }
}
