//! Client registry
//!
//! Folds the connection facts every provider reports into one [`Client`]
//! per endpoint. All state sits behind a single mutex; callers only ever get
//! owned snapshots, and events are emitted after the lock is released.
//! Every change is stamped with a revision under that lock, and a client
//! list older than one already emitted is never delivered, so the last list
//! a listener sees always matches the registry.
//!
//! Merge policy for a fact that is not already bound to a client:
//! - candidates are the client named by the fact's `client_id` hint (if it
//!   exists) and every client with the same manifest identity
//! - exactly one candidate merges
//! - several candidates, or a candidate that is already live on a different
//!   endpoint of the same provider kind, split into a new client
//!
//! A client known through a single endpoint that only later reports its
//! manifest identity is folded into the one existing client with that
//! identity, under the same rules. Its own record is removed.

use deskhub_core::{
    time, Client, ClientId, ConnectionFact, ConnectionState, Error, Identifier, ProviderKind,
    ProviderMeta,
};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::subscription::{SubscriptionHandle, Topic};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a client with no active identifier is kept before eviction
    pub grace_period: Duration,
    /// Tie-break order for primary selection, most preferred first
    pub provider_priority: Vec<ProviderKind>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            provider_priority: vec![ProviderKind::network_socket(), ProviderKind::usb_bridge()],
        }
    }
}

/// What happened to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientChange {
    Added,
    Updated,
    Removed,
}

/// Emitted on every add, remove or state transition
#[derive(Debug, Clone)]
pub struct ClientUpdate {
    pub client_id: ClientId,
    pub change: ClientChange,
    /// State before this update (`None` for new clients)
    pub previous_state: Option<ConnectionState>,
    /// Snapshot after the update; the last known record for removals
    pub client: Client,
}

impl ClientUpdate {
    /// Whether this update moved the client into `Established`
    pub fn became_established(&self) -> bool {
        self.change != ClientChange::Removed
            && self.client.connection_state == ConnectionState::Established
            && self.previous_state != Some(ConnectionState::Established)
    }
}

/// Pick the identifier outbound sends go through.
///
/// Only active identifiers qualify. Lowest latency wins, unknown latency
/// sorts after any known value; ties fall back to `priority` (unlisted kinds
/// last) and finally to the kind name.
pub fn select_primary(
    identifiers: &BTreeMap<ProviderKind, Identifier>,
    priority: &[ProviderKind],
) -> Option<ProviderKind> {
    let rank = |kind: &ProviderKind| {
        priority
            .iter()
            .position(|p| p == kind)
            .unwrap_or(priority.len())
    };
    let latency = |identifier: &Identifier| match identifier.latency_ms {
        Some(ms) => (false, ms),
        None => (true, 0),
    };

    identifiers
        .iter()
        .filter(|(_, identifier)| identifier.active)
        .min_by(|(ka, a), (kb, b)| {
            latency(a)
                .cmp(&latency(b))
                .then_with(|| rank(ka).cmp(&rank(kb)))
                .then_with(|| ka.cmp(kb))
        })
        .map(|(kind, _)| kind.clone())
}

struct PendingEviction {
    generation: u64,
    deadline: Instant,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryState {
    clients: BTreeMap<ClientId, Client>,
    bindings: HashMap<(ProviderKind, String), ClientId>,
    evictions: HashMap<ClientId, PendingEviction>,
    generation: u64,
    revision: u64,
}

impl RegistryState {
    fn snapshot(&self) -> Vec<Client> {
        self.clients.values().cloned().collect()
    }

    fn notification(&mut self, updates: Vec<ClientUpdate>) -> Notification {
        self.revision += 1;
        Notification {
            revision: self.revision,
            updates,
            clients: self.snapshot(),
        }
    }
}

/// Outcome of resolving a fact to a client
struct Resolution {
    client_id: ClientId,
    created: bool,
    /// Single-endpoint client folded into `client_id`
    absorbed: Option<Client>,
}

struct Notification {
    revision: u64,
    updates: Vec<ClientUpdate>,
    clients: Vec<Client>,
}

/// The single source of truth for connected clients
pub struct ClientRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    client_list: Topic<Vec<Client>>,
    updates: Topic<ClientUpdate>,
    /// Revision of the last emitted client list
    emitted: ReentrantMutex<Cell<u64>>,
    weak_self: Weak<ClientRegistry>,
}

impl ClientRegistry {
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            state: Mutex::new(RegistryState::default()),
            client_list: Topic::new(),
            updates: Topic::new(),
            emitted: ReentrantMutex::new(Cell::new(0)),
            weak_self: weak.clone(),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Merge one provider fact.
    ///
    /// Returns the id of the client the fact was applied to, or `None` for a
    /// terminal fact about an endpoint the registry never knew. Applying the
    /// same fact twice is a no-op the second time and emits nothing.
    pub fn report_connection_fact(&self, fact: ConnectionFact) -> Option<ClientId> {
        let (client_id, notification) = {
            let mut state = self.state.lock();
            let Resolution {
                client_id,
                created,
                absorbed,
            } = self.resolve(&mut state, &fact)?;

            let before = if created {
                None
            } else {
                state.clients.get(&client_id).cloned()
            };

            let previous_binding = state
                .clients
                .get(&client_id)
                .and_then(|c| c.identifiers.get(&fact.provider))
                .map(|i| i.provider_id.clone())
                .filter(|old| *old != fact.provider_id);
            if let Some(old) = previous_binding {
                state.bindings.remove(&(fact.provider.clone(), old));
            }
            state.bindings.insert(
                (fact.provider.clone(), fact.provider_id.clone()),
                client_id.clone(),
            );

            let client = state.clients.get_mut(&client_id)?;
            apply_fact(client, &fact, &self.config.provider_priority);

            if let Some(before) = &before {
                if !differs(before, client) {
                    debug!(
                        "Duplicate fact from {}:{} for {}",
                        fact.provider, fact.provider_id, client_id
                    );
                    return Some(client_id);
                }
            }
            client.timestamp = time::now();
            let active = client.is_active();
            let snapshot = client.clone();

            if active {
                self.cancel_eviction(&mut state, &client_id);
            } else {
                self.schedule_eviction(&mut state, &client_id);
            }

            let mut updates = Vec::with_capacity(2);
            if let Some(absorbed) = absorbed {
                info!(
                    "Client {} folded into {} via {}",
                    absorbed.client_id, client_id, fact.provider
                );
                updates.push(ClientUpdate {
                    client_id: absorbed.client_id.clone(),
                    change: ClientChange::Removed,
                    previous_state: Some(absorbed.connection_state),
                    client: absorbed,
                });
            }

            let update = match before {
                None => {
                    info!(
                        "Client {} added via {} ({})",
                        client_id, fact.provider, snapshot.connection_state
                    );
                    ClientUpdate {
                        client_id: client_id.clone(),
                        change: ClientChange::Added,
                        previous_state: None,
                        client: snapshot,
                    }
                }
                Some(before) => {
                    if before.connection_state != snapshot.connection_state {
                        info!(
                            "Client {} {} -> {} via {}",
                            client_id,
                            before.connection_state,
                            snapshot.connection_state,
                            fact.provider
                        );
                    }
                    ClientUpdate {
                        client_id: client_id.clone(),
                        change: ClientChange::Updated,
                        previous_state: Some(before.connection_state),
                        client: snapshot,
                    }
                }
            };

            updates.push(update);
            (client_id, state.notification(updates))
        };

        self.notify(notification);
        Some(client_id)
    }

    /// Replace a client's manifest with the one the device reported
    pub fn update_manifest(
        &self,
        client_id: &str,
        manifest: deskhub_core::ClientManifest,
    ) -> bool {
        let notification = {
            let mut state = self.state.lock();
            let Some(client) = state.clients.get(client_id) else {
                debug!("Manifest for unknown client {}", client_id);
                return false;
            };
            if client.manifest.as_ref() == Some(&manifest) {
                return false;
            }
            if let Some(fact) = self.refold_fact(&state, client_id, &manifest) {
                drop(state);
                return self.report_connection_fact(fact).is_some();
            }
            let Some(client) = state.clients.get_mut(client_id) else {
                return false;
            };
            let previous_state = client.connection_state;
            client.manifest = Some(manifest);
            client.timestamp = time::now();
            info!("Updated manifest for client {}", client_id);
            let update = ClientUpdate {
                client_id: client_id.to_string(),
                change: ClientChange::Updated,
                previous_state: Some(previous_state),
                client: client.clone(),
            };
            state.notification(vec![update])
        };
        self.notify(notification);
        true
    }

    /// Deactivate every identifier of one provider kind (provider detached)
    pub fn remove_provider(&self, kind: &ProviderKind) {
        let notification = {
            let mut state = self.state.lock();
            let affected: Vec<ClientId> = state
                .clients
                .iter()
                .filter(|(_, c)| c.identifiers.get(kind).map_or(false, |i| i.active))
                .map(|(id, _)| id.clone())
                .collect();
            if affected.is_empty() {
                return;
            }

            let mut updates = Vec::with_capacity(affected.len());
            for client_id in affected {
                let Some(client) = state.clients.get_mut(&client_id) else {
                    continue;
                };
                let previous_state = client.connection_state;
                if let Some(identifier) = client.identifiers.get_mut(kind) {
                    identifier.active = false;
                    identifier.state = ConnectionState::Disconnected;
                }
                client.primary_provider =
                    select_primary(&client.identifiers, &self.config.provider_priority);
                client.connection_state = derive_state(client, ConnectionState::Disconnected);
                client.timestamp = time::now();
                let snapshot = client.clone();
                if !snapshot.is_active() {
                    self.schedule_eviction(&mut state, &client_id);
                }
                updates.push(ClientUpdate {
                    client_id,
                    change: ClientChange::Updated,
                    previous_state: Some(previous_state),
                    client: snapshot,
                });
            }
            info!("Provider {} detached, {} clients affected", kind, updates.len());
            state.notification(updates)
        };
        self.notify(notification);
    }

    /// Evict every client whose grace period has run out
    pub fn evict_expired(&self) -> Vec<ClientId> {
        let now = Instant::now();
        let due: Vec<(ClientId, u64)> = {
            let state = self.state.lock();
            state
                .evictions
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(id, pending)| (id.clone(), pending.generation))
                .collect()
        };
        due.into_iter()
            .filter(|(id, generation)| self.expire(id, *generation))
            .map(|(id, _)| id)
            .collect()
    }

    /// Snapshot of every client, ordered by id
    pub fn get_clients(&self) -> Vec<Client> {
        self.state.lock().snapshot()
    }

    pub fn get_client(&self, client_id: &str) -> Option<Client> {
        self.state.lock().clients.get(client_id).cloned()
    }

    /// The client an endpoint is bound to
    pub fn client_for_provider(&self, kind: &ProviderKind, provider_id: &str) -> Option<Client> {
        let state = self.state.lock();
        let client_id = state
            .bindings
            .get(&(kind.clone(), provider_id.to_string()))?;
        state.clients.get(client_id).cloned()
    }

    /// Primary provider and endpoint for a client, read atomically
    pub fn resolve_route(&self, client_id: &str) -> Option<(ProviderKind, String)> {
        let state = self.state.lock();
        let client = state.clients.get(client_id)?;
        client
            .primary_identifier()
            .map(|(kind, identifier)| (kind.clone(), identifier.provider_id.clone()))
    }

    /// Whether an eviction is pending for a client
    pub fn is_evicting(&self, client_id: &str) -> bool {
        self.state.lock().evictions.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full client list after every change
    pub fn on_client_list_changed<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Vec<Client>) + Send + Sync + 'static,
    {
        self.client_list.subscribe(listener)
    }

    /// Per-client add, update and removal
    pub fn on_connection_fact<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&ClientUpdate) + Send + Sync + 'static,
    {
        self.updates.subscribe(listener)
    }

    fn notify(&self, notification: Notification) {
        let emitted = self.emitted.lock();
        for update in &notification.updates {
            self.updates.emit(update);
        }
        if notification.revision > emitted.get() {
            emitted.set(notification.revision);
            self.client_list.emit(&notification.clients);
        } else {
            debug!(
                "Skipping client list revision {} (already at {})",
                notification.revision,
                emitted.get()
            );
        }
    }

    /// Find or create the client a fact belongs to
    fn resolve(&self, state: &mut RegistryState, fact: &ConnectionFact) -> Option<Resolution> {
        let key = (fact.provider.clone(), fact.provider_id.clone());
        if let Some(id) = state.bindings.get(&key).cloned() {
            if state.clients.contains_key(&id) {
                let target = match fact.manifest.as_ref().and_then(|m| m.identity()) {
                    Some(identity) => fold_target(state, &id, identity, fact),
                    None => None,
                };
                let Some(target) = target else {
                    return Some(Resolution {
                        client_id: id,
                        created: false,
                        absorbed: None,
                    });
                };
                self.cancel_eviction(state, &id);
                state.bindings.retain(|_, bound| *bound != id);
                return Some(Resolution {
                    client_id: target,
                    created: false,
                    absorbed: state.clients.remove(&id),
                });
            }
        }

        if !fact.state.is_live() {
            debug!(
                "Ignoring {} fact for unknown endpoint {}:{}",
                fact.state, fact.provider, fact.provider_id
            );
            return None;
        }

        let mut candidates: Vec<ClientId> = Vec::new();
        if let Some(hint) = &fact.client_id {
            if state.clients.contains_key(hint) {
                candidates.push(hint.clone());
            }
        }
        if let Some(identity) = fact.manifest.as_ref().and_then(|m| m.identity()) {
            for (id, client) in &state.clients {
                if client.manifest_identity() == Some(identity) && !candidates.contains(id) {
                    candidates.push(id.clone());
                }
            }
        }

        let conflicting = candidates.iter().any(|id| {
            state.clients[id]
                .identifiers
                .get(&fact.provider)
                .map_or(false, |i| i.active && i.provider_id != fact.provider_id)
        });

        match candidates.len() {
            0 => {}
            1 if !conflicting => {
                return Some(Resolution {
                    client_id: candidates.remove(0),
                    created: false,
                    absorbed: None,
                })
            }
            n => {
                let err = Error::IdentityReconciliationAmbiguous {
                    provider: fact.provider.to_string(),
                    provider_id: fact.provider_id.clone(),
                    candidates: n,
                };
                warn!("{}; creating a separate client", err);
            }
        }

        let client_id = match &fact.client_id {
            Some(hint) if !state.clients.contains_key(hint) => hint.clone(),
            _ => Uuid::new_v4().to_string(),
        };
        state
            .clients
            .insert(client_id.clone(), Client::new(client_id.clone()));
        Some(Resolution {
            client_id,
            created: true,
            absorbed: None,
        })
    }

    /// The fact that replays a single-endpoint client's identifier with a
    /// newly learned manifest, when that manifest folds it into another client
    fn refold_fact(
        &self,
        state: &RegistryState,
        client_id: &str,
        manifest: &deskhub_core::ClientManifest,
    ) -> Option<ConnectionFact> {
        let client = state.clients.get(client_id)?;
        let (kind, identifier) = client.identifiers.iter().next()?;
        let mut fact = ConnectionFact::new(
            kind.clone(),
            identifier.provider_id.clone(),
            identifier.state,
        )
        .with_manifest(manifest.clone());
        fact.meta = client.meta.get(kind).cloned();
        let identity = manifest.identity()?;
        fold_target(state, client_id, identity, &fact)?;
        Some(fact)
    }

    fn schedule_eviction(&self, state: &mut RegistryState, client_id: &ClientId) {
        if state.evictions.contains_key(client_id) {
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        let grace = self.config.grace_period;
        let deadline = Instant::now() + grace;

        let task = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = self.weak_self.clone();
                let id = client_id.clone();
                Some(handle.spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    if let Some(registry) = weak.upgrade() {
                        registry.expire(&id, generation);
                    }
                }))
            }
            Err(_) => None,
        };

        debug!("Client {} scheduled for eviction in {:?}", client_id, grace);
        state.evictions.insert(
            client_id.clone(),
            PendingEviction {
                generation,
                deadline,
                task,
            },
        );
    }

    fn cancel_eviction(&self, state: &mut RegistryState, client_id: &str) {
        if let Some(pending) = state.evictions.remove(client_id) {
            if let Some(task) = pending.task {
                task.abort();
            }
            debug!("Client {} reactivated, eviction cancelled", client_id);
        }
    }

    fn expire(&self, client_id: &str, generation: u64) -> bool {
        let notification = {
            let mut state = self.state.lock();
            match state.evictions.get(client_id) {
                Some(pending) if pending.generation == generation => {}
                _ => return false,
            }
            state.evictions.remove(client_id);

            if state
                .clients
                .get(client_id)
                .map_or(true, |c| c.is_active())
            {
                return false;
            }
            let Some(client) = state.clients.remove(client_id) else {
                return false;
            };
            state.bindings.retain(|_, id| id != client_id);
            info!("Client {} evicted after grace period", client_id);

            let update = ClientUpdate {
                client_id: client_id.to_string(),
                change: ClientChange::Removed,
                previous_state: Some(client.connection_state),
                client,
            };
            state.notification(vec![update])
        };
        self.notify(notification);
        true
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

fn apply_fact(client: &mut Client, fact: &ConnectionFact, priority: &[ProviderKind]) {
    let offline = fact
        .meta
        .as_ref()
        .and_then(|m| m.offline)
        .unwrap_or(false);
    let latency = fact.meta.as_ref().and_then(ProviderMeta::latency);

    let identifier = client
        .identifiers
        .entry(fact.provider.clone())
        .or_insert_with(|| Identifier {
            provider_id: fact.provider_id.clone(),
            active: false,
            state: ConnectionState::Disconnected,
            latency_ms: None,
        });
    identifier.provider_id = fact.provider_id.clone();
    identifier.active = fact.state.is_live() && !offline;
    identifier.state = fact.state;
    if latency.is_some() {
        identifier.latency_ms = latency;
    }

    if let Some(meta) = &fact.meta {
        client
            .meta
            .entry(fact.provider.clone())
            .or_default()
            .merge(meta);
    }
    if let Some(manifest) = &fact.manifest {
        client.manifest = Some(manifest.clone());
    }

    client.primary_provider = select_primary(&client.identifiers, priority);
    client.connection_state = derive_state(client, fact.state);
}

/// Highest live state among active identifiers; `Failed` only when the
/// triggering fact failed and nothing else is live
fn derive_state(client: &Client, last: ConnectionState) -> ConnectionState {
    client
        .active_identifiers()
        .map(|(_, identifier)| identifier.state)
        .max_by_key(ConnectionState::rank)
        .unwrap_or(if last == ConnectionState::Failed {
            ConnectionState::Failed
        } else {
            ConnectionState::Disconnected
        })
}

/// The client a single-endpoint client should be folded into once it
/// reports `identity`.
///
/// Only a client that is bound through exactly this one endpoint and did not
/// carry the identity before qualifies; the target must be the only other
/// client with that identity and must not be live on another endpoint of the
/// same kind.
fn fold_target(
    state: &RegistryState,
    client_id: &str,
    identity: &str,
    fact: &ConnectionFact,
) -> Option<ClientId> {
    let client = state.clients.get(client_id)?;
    if client.identifiers.len() != 1
        || !client.identifiers.contains_key(&fact.provider)
        || client.manifest_identity() == Some(identity)
    {
        return None;
    }

    let candidates: Vec<&ClientId> = state
        .clients
        .iter()
        .filter(|(id, c)| id.as_str() != client_id && c.manifest_identity() == Some(identity))
        .map(|(id, _)| id)
        .collect();
    match candidates.as_slice() {
        [] => None,
        [target] => {
            let conflicting = state.clients[*target]
                .identifiers
                .get(&fact.provider)
                .map_or(false, |i| i.active && i.provider_id != fact.provider_id);
            if conflicting {
                let err = Error::IdentityReconciliationAmbiguous {
                    provider: fact.provider.to_string(),
                    provider_id: fact.provider_id.clone(),
                    candidates: 1,
                };
                warn!("{}; keeping client {} separate", err, client_id);
                None
            } else {
                Some((*target).clone())
            }
        }
        several => {
            let err = Error::IdentityReconciliationAmbiguous {
                provider: fact.provider.to_string(),
                provider_id: fact.provider_id.clone(),
                candidates: several.len(),
            };
            warn!("{}; keeping client {} separate", err, client_id);
            None
        }
    }
}

fn differs(before: &Client, after: &Client) -> bool {
    before.identifiers != after.identifiers
        || before.primary_provider != after.primary_provider
        || before.connection_state != after.connection_state
        || before.manifest != after.manifest
        || before.meta != after.meta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier(active: bool, latency: Option<u32>) -> Identifier {
        Identifier {
            provider_id: "id".into(),
            active,
            state: if active {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
            latency_ms: latency,
        }
    }

    fn priority() -> Vec<ProviderKind> {
        RegistryConfig::default().provider_priority
    }

    #[test]
    fn test_select_primary_lowest_latency() {
        let mut ids = BTreeMap::new();
        ids.insert(ProviderKind::usb_bridge(), identifier(true, Some(4)));
        ids.insert(ProviderKind::network_socket(), identifier(true, Some(20)));
        assert_eq!(
            select_primary(&ids, &priority()),
            Some(ProviderKind::usb_bridge())
        );
    }

    #[test]
    fn test_select_primary_tie_uses_priority() {
        let mut ids = BTreeMap::new();
        ids.insert(ProviderKind::usb_bridge(), identifier(true, None));
        ids.insert(ProviderKind::network_socket(), identifier(true, None));
        assert_eq!(
            select_primary(&ids, &priority()),
            Some(ProviderKind::network_socket())
        );

        let reversed = vec![ProviderKind::usb_bridge(), ProviderKind::network_socket()];
        assert_eq!(
            select_primary(&ids, &reversed),
            Some(ProviderKind::usb_bridge())
        );
    }

    #[test]
    fn test_select_primary_known_latency_beats_unknown() {
        let mut ids = BTreeMap::new();
        ids.insert(ProviderKind::usb_bridge(), identifier(true, Some(500)));
        ids.insert(ProviderKind::network_socket(), identifier(true, None));
        assert_eq!(
            select_primary(&ids, &priority()),
            Some(ProviderKind::usb_bridge())
        );
    }

    #[test]
    fn test_select_primary_skips_inactive() {
        let mut ids = BTreeMap::new();
        ids.insert(ProviderKind::usb_bridge(), identifier(true, Some(50)));
        ids.insert(ProviderKind::network_socket(), identifier(false, Some(1)));
        assert_eq!(
            select_primary(&ids, &priority()),
            Some(ProviderKind::usb_bridge())
        );

        ids.get_mut(&ProviderKind::usb_bridge()).unwrap().active = false;
        assert_eq!(select_primary(&ids, &priority()), None);
    }

    #[test]
    fn test_select_primary_unlisted_kind_last() {
        let mut ids = BTreeMap::new();
        ids.insert(ProviderKind::new("bluetooth"), identifier(true, None));
        ids.insert(ProviderKind::usb_bridge(), identifier(true, None));
        assert_eq!(
            select_primary(&ids, &priority()),
            Some(ProviderKind::usb_bridge())
        );
    }

    #[test]
    fn test_derive_state_failed_only_when_nothing_live() {
        let mut client = Client::new("x");
        client
            .identifiers
            .insert(ProviderKind::usb_bridge(), identifier(false, None));
        assert_eq!(
            derive_state(&client, ConnectionState::Failed),
            ConnectionState::Failed
        );

        client
            .identifiers
            .insert(ProviderKind::network_socket(), identifier(true, None));
        assert_eq!(
            derive_state(&client, ConnectionState::Failed),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_registry_works_without_runtime() {
        let registry = ClientRegistry::new(RegistryConfig {
            grace_period: Duration::ZERO,
            ..Default::default()
        });
        let id = registry
            .report_connection_fact(ConnectionFact::new(
                ProviderKind::usb_bridge(),
                "serial",
                ConnectionState::Connected,
            ))
            .unwrap();
        registry.report_connection_fact(ConnectionFact::new(
            ProviderKind::usb_bridge(),
            "serial",
            ConnectionState::Disconnected,
        ));
        assert!(registry.is_evicting(&id));
        assert_eq!(registry.evict_expired(), vec![id]);
        assert!(registry.is_empty());
    }
}
