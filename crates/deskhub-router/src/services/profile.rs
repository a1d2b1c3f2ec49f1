//! Profile synchronizer
//!
//! Holds at most one active profile and pushes it to devices as
//! `client/config set` (plus `client/mappings set` when the profile carries a
//! mapping). Pushes happen whenever a device's initial data is sent, which
//! the router does on every transition to Established, on `server/config get`
//! and on activation. A device without a route is skipped, not retried.

use deskhub_core::{Envelope, Error, ServerType, CLIENT_APP};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::router::{Router, SendOutcome, ServerSubsystem, WeakRouter};
use crate::subscription::SubscriptionHandle;

/// Device configuration bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub client_config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>, client_config: Value) -> Self {
        Self {
            id: id.into(),
            client_config,
            mapping: None,
        }
    }

    pub fn with_mapping(mut self, mapping: Value) -> Self {
        self.mapping = Some(mapping);
        self
    }

    fn envelopes(&self) -> Vec<Envelope> {
        let mut envelopes = vec![Envelope::new(CLIENT_APP, "config")
            .with_request("set")
            .with_payload(self.client_config.clone())];
        if let Some(mapping) = &self.mapping {
            envelopes.push(
                Envelope::new(CLIENT_APP, "mappings")
                    .with_request("set")
                    .with_payload(mapping.clone()),
            );
        }
        envelopes
    }
}

pub struct ProfileSynchronizer {
    router: WeakRouter,
    active: RwLock<Option<Profile>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ProfileSynchronizer {
    /// Register for `server/config` and initial-data notifications
    pub fn install(router: &Router) -> Result<Arc<Self>> {
        let sync = Arc::new(Self {
            router: router.downgrade(),
            active: RwLock::new(None),
            subscription: Mutex::new(None),
        });
        router.register_subsystem(ServerType::Config, sync.clone())?;

        let weak = Arc::downgrade(&sync);
        let handle = router.on_initial_data(move |client_id| {
            if let Some(sync) = weak.upgrade() {
                sync.sync_client(client_id);
            }
        });
        *sync.subscription.lock() = Some(handle);
        Ok(sync)
    }

    pub fn active(&self) -> Option<Profile> {
        self.active.read().clone()
    }

    /// Make `profile` active and push it to every established client.
    ///
    /// Returns the number of clients it was queued for.
    pub fn activate(&self, profile: Profile) -> usize {
        info!("Activating profile {}", profile.id);
        *self.active.write() = Some(profile.clone());

        let Some(router) = self.router.upgrade() else {
            return 0;
        };
        let envelopes = profile.envelopes();
        router
            .get_clients()
            .iter()
            .filter(|client| client.is_established())
            .filter(|client| Self::push(&router, &client.client_id, &envelopes))
            .count()
    }

    pub fn deactivate(&self) -> Option<Profile> {
        let previous = self.active.write().take();
        if let Some(profile) = &previous {
            info!("Deactivated profile {}", profile.id);
        }
        previous
    }

    /// Push the active profile to one client
    pub fn sync_client(&self, client_id: &str) -> bool {
        match self.router.upgrade() {
            Some(router) => self.sync_with(&router, client_id),
            None => false,
        }
    }

    fn sync_with(&self, router: &Router, client_id: &str) -> bool {
        let Some(profile) = self.active() else {
            debug!("No active profile to push to {}", client_id);
            return false;
        };
        Self::push(router, client_id, &profile.envelopes())
    }

    fn push(router: &Router, client_id: &str, envelopes: &[Envelope]) -> bool {
        for envelope in envelopes {
            if let SendOutcome::NoRoute = router.send(envelope.clone().with_client(client_id)) {
                info!("Profile not pushed: {}", Error::NoRoute(client_id.to_string()));
                return false;
            }
        }
        debug!("Profile pushed to {}", client_id);
        true
    }

    /// Replace the active profile's device configuration
    fn store_client_config(&self, client_id: &str, config: Value) {
        let mut active = self.active.write();
        match active.as_mut() {
            Some(profile) => {
                profile.client_config = config;
                info!("Client {} updated config of profile {}", client_id, profile.id);
            }
            None => {
                info!("Client {} created the default profile", client_id);
                *active = Some(Profile::new("default", config));
            }
        }
    }
}

impl ServerSubsystem for ProfileSynchronizer {
    fn handle_data(&self, router: &Router, envelope: Envelope) {
        let Some(client_id) = envelope.client_id.clone() else {
            debug!("Dropping server/config without a client");
            return;
        };
        match envelope.request() {
            Some("get") | None => {
                self.sync_with(router, &client_id);
            }
            Some("set") => match envelope.payload {
                Some(config) => self.store_client_config(&client_id, config),
                None => warn!("server/config set from {} has no payload", client_id),
            },
            Some(other) => debug!("Unhandled config request '{}' from {}", other, client_id),
        }
    }
}
