//! Message router
//!
//! Owns the attached providers, the client registry, the app inboxes and the
//! per-client outbound pipes. Inbound traffic flows
//! provider → registry/decode → subsystem or app inbox; outbound traffic
//! flows app or subsystem → `send` → the client's primary provider.
//!
//! Ordering:
//! - one task per provider processes its events in arrival order
//! - one task per app drains that app's inbox
//! - one task per client drains its outbound pipe
//!
//! `send` and `route` never wait on transport I/O. Transmit errors surface
//! through [`Router::on_transmit_failure`].

use deskhub_core::{
    codec, time, AppId, BinaryEnvelope, Client, ClientId, ConnectionFact, Destination, Envelope,
    Error, ProviderKind, ServerType, CLIENT_APP,
};
use deskhub_transport::{
    provider_channel, ProviderEvent, ProviderEvents, ProviderSink, TransportProvider,
    DEFAULT_EVENT_CAPACITY,
};
use bytes::Bytes;
use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RouterError};
use crate::inbox::{AppDelivery, AppInbox, AppSlot};
use crate::queue::BoundedQueue;
use crate::registry::{ClientChange, ClientRegistry, ClientUpdate, RegistryConfig};
use crate::services::core::CoreService;
use crate::subscription::{SubscriptionHandle, Topic};

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Hub name, reported in logs
    pub name: String,
    /// Entries buffered per app before the oldest is dropped
    pub app_queue_capacity: usize,
    /// Envelopes buffered per client before the oldest is dropped
    pub outbound_queue_capacity: usize,
    /// Capacity of each provider → router event channel
    pub provider_channel_capacity: usize,
    pub registry: RegistryConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            name: "DeskHub".to_string(),
            app_queue_capacity: 256,
            outbound_queue_capacity: 256,
            provider_channel_capacity: DEFAULT_EVENT_CAPACITY,
            registry: RegistryConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Reject settings the router cannot run with
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("app_queue_capacity", self.app_queue_capacity),
            ("outbound_queue_capacity", self.outbound_queue_capacity),
            ("provider_channel_capacity", self.provider_channel_capacity),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(RouterError::Config(format!("{} must be at least 1", name)));
        }

        let priority = &self.registry.provider_priority;
        for (i, kind) in priority.iter().enumerate() {
            if kind.as_str().trim().is_empty() {
                return Err(RouterError::Config(
                    "provider_priority contains an empty provider kind".into(),
                ));
            }
            if priority[..i].contains(kind) {
                return Err(RouterError::Config(format!(
                    "provider_priority lists {} twice",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Result of [`Router::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted and bound to this provider
    Queued(ProviderKind),
    /// Unknown client, or no active identifier
    NoRoute,
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued(_))
    }
}

/// A decoded envelope from a known client
#[derive(Debug, Clone)]
pub struct DataReceived {
    pub client: Client,
    pub envelope: Envelope,
}

/// A binary frame from a known client.
///
/// Listeners only see the header; the buffer itself goes to the `audio`
/// subsystem so a single consumer can keep it without a copy.
#[derive(Debug, Clone)]
pub struct BinaryReceived {
    pub client: Client,
    pub app: String,
    pub kind: String,
    pub len: usize,
}

/// An accepted send the provider failed to deliver
#[derive(Debug, Clone)]
pub struct TransmitFailure {
    pub client_id: ClientId,
    pub provider: ProviderKind,
    pub provider_id: String,
    pub envelope: Envelope,
    pub reason: String,
}

/// Handles server-bound envelopes of one [`ServerType`]
pub trait ServerSubsystem: Send + Sync {
    fn handle_data(&self, router: &Router, envelope: Envelope);

    fn handle_binary(&self, router: &Router, envelope: BinaryEnvelope) {
        let _ = router;
        debug!(
            "Dropping {} byte binary {}/{} without a consumer",
            envelope.data.len(),
            envelope.app,
            envelope.kind
        );
    }
}

/// Handles app → hub requests of one envelope type
pub trait AppRequestHandler: Send + Sync {
    fn handle_app_request(&self, router: &Router, app_id: &str, envelope: Envelope);
}

/// Decides whether an app may send or receive one envelope type
pub trait AppAuthorizer: Send + Sync {
    fn is_authorized(&self, app_id: &str) -> bool;
}

struct Outbound {
    provider: ProviderKind,
    provider_id: String,
    envelope: Envelope,
}

struct ProviderSlot {
    id: u64,
    provider: Arc<dyn TransportProvider>,
    task: JoinHandle<()>,
}

struct RouterInner {
    config: RouterConfig,
    registry: Arc<ClientRegistry>,
    providers: DashMap<ProviderKind, ProviderSlot>,
    next_provider_id: AtomicU64,
    subsystems: RwLock<HashMap<ServerType, Arc<dyn ServerSubsystem>>>,
    handlers: RwLock<HashMap<String, Arc<dyn AppRequestHandler>>>,
    authorizers: RwLock<HashMap<String, Arc<dyn AppAuthorizer>>>,
    apps: DashMap<AppId, AppSlot>,
    outbound: DashMap<ClientId, Arc<BoundedQueue<Outbound>>>,
    data_received: Topic<DataReceived>,
    binary_received: Topic<BinaryReceived>,
    transmit_failure: Topic<TransmitFailure>,
    initial_data: Topic<ClientId>,
    registry_subscriptions: Mutex<Vec<SubscriptionHandle>>,
}

/// DeskHub router. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// Non-owning router handle for long-lived listeners and tasks
#[derive(Clone)]
pub struct WeakRouter {
    inner: Weak<RouterInner>,
}

impl WeakRouter {
    pub fn upgrade(&self) -> Option<Router> {
        self.inner.upgrade().map(|inner| Router { inner })
    }
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let registry = ClientRegistry::new(config.registry.clone());
        let core: Arc<dyn ServerSubsystem> = Arc::new(CoreService);
        let subsystems = CoreService::SERVER_TYPES
            .iter()
            .map(|ty| (*ty, Arc::clone(&core)))
            .collect();

        let router = Self {
            inner: Arc::new(RouterInner {
                config,
                registry,
                providers: DashMap::new(),
                next_provider_id: AtomicU64::new(1),
                subsystems: RwLock::new(subsystems),
                handlers: RwLock::new(HashMap::new()),
                authorizers: RwLock::new(HashMap::new()),
                apps: DashMap::new(),
                outbound: DashMap::new(),
                data_received: Topic::new(),
                binary_received: Topic::new(),
                transmit_failure: Topic::new(),
                initial_data: Topic::new(),
                registry_subscriptions: Mutex::new(Vec::new()),
            }),
        };

        let weak = router.downgrade();
        let handle = router.inner.registry.on_connection_fact(move |update| {
            if let Some(router) = weak.upgrade() {
                router.on_registry_update(update);
            }
        });
        router.inner.registry_subscriptions.lock().push(handle);

        info!("Router '{}' created", router.inner.config.name);
        router
    }

    pub fn downgrade(&self) -> WeakRouter {
        WeakRouter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.inner.registry
    }

    // =========================================================================
    // Providers
    // =========================================================================

    /// Event channel sized by the router configuration
    pub fn provider_channel(&self, kind: ProviderKind) -> (ProviderSink, ProviderEvents) {
        provider_channel(kind, self.inner.config.provider_channel_capacity)
    }

    /// Attach a provider and start processing its events.
    ///
    /// When the event channel closes the provider is detached and its
    /// identifiers go inactive.
    pub fn attach_provider(
        &self,
        provider: Arc<dyn TransportProvider>,
        mut events: ProviderEvents,
    ) -> Result<()> {
        let kind = provider.kind();
        if self.inner.providers.contains_key(&kind) {
            return Err(RouterError::DuplicateProvider(kind.to_string()));
        }

        let id = self.inner.next_provider_id.fetch_add(1, Ordering::Relaxed);
        let weak = self.downgrade();
        let task_kind = kind.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(router) = weak.upgrade() else {
                    return;
                };
                router.handle_provider_event(&task_kind, event);
            }

            if let Some(router) = weak.upgrade() {
                info!("Provider {} event channel closed", task_kind);
                let removed = router
                    .inner
                    .providers
                    .remove_if(&task_kind, |_, slot| slot.id == id)
                    .is_some();
                if removed {
                    router.inner.registry.remove_provider(&task_kind);
                }
            }
        });

        self.inner
            .providers
            .insert(kind.clone(), ProviderSlot { id, provider, task });
        info!("Provider {} attached", kind);
        Ok(())
    }

    /// Stop processing a provider's events and deactivate its identifiers
    pub fn detach_provider(&self, kind: &ProviderKind) -> bool {
        match self.inner.providers.remove(kind) {
            Some((_, slot)) => {
                slot.task.abort();
                self.inner.registry.remove_provider(kind);
                info!("Provider {} detached", kind);
                true
            }
            None => false,
        }
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self
            .inner
            .providers
            .iter()
            .map(|e| e.key().clone())
            .collect();
        kinds.sort();
        kinds
    }

    fn provider(&self, kind: &ProviderKind) -> Option<Arc<dyn TransportProvider>> {
        self.inner
            .providers
            .get(kind)
            .map(|slot| Arc::clone(&slot.provider))
    }

    fn handle_provider_event(&self, kind: &ProviderKind, event: ProviderEvent) {
        match event {
            ProviderEvent::Fact(fact) => self.report_fact(kind, fact),
            ProviderEvent::Data { provider_id, data } => {
                self.handle_provider_data(kind, &provider_id, data)
            }
            ProviderEvent::Binary { provider_id, data } => {
                self.handle_provider_binary(kind, &provider_id, data)
            }
            ProviderEvent::Error(message) => {
                error!("Provider {} error: {}", kind, message);
            }
        }
    }

    fn report_fact(&self, kind: &ProviderKind, mut fact: ConnectionFact) {
        if fact.provider != *kind {
            warn!(
                "Provider {} reported a fact as {}, using {}",
                kind, fact.provider, kind
            );
            fact.provider = kind.clone();
        }
        self.inner.registry.report_connection_fact(fact);
    }

    fn handle_provider_data(&self, kind: &ProviderKind, provider_id: &str, data: Bytes) {
        let mut envelope = match codec::decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping envelope from {}:{}: {}", kind, provider_id, e);
                return;
            }
        };
        let Some(client) = self.inner.registry.client_for_provider(kind, provider_id) else {
            warn!(
                "Dropping {}/{} from unbound endpoint {}:{}",
                envelope.app, envelope.kind, kind, provider_id
            );
            return;
        };

        envelope.client_id = Some(client.client_id.clone());
        self.inner.data_received.emit(&DataReceived {
            client,
            envelope: envelope.clone(),
        });
        self.route(envelope);
    }

    fn handle_provider_binary(&self, kind: &ProviderKind, provider_id: &str, data: BytesMut) {
        let Some(client) = self.inner.registry.client_for_provider(kind, provider_id) else {
            warn!(
                "Dropping {} byte binary frame from unbound endpoint {}:{}",
                data.len(),
                kind,
                provider_id
            );
            return;
        };

        let envelope = BinaryEnvelope::audio(client.client_id.clone(), data);
        self.inner.binary_received.emit(&BinaryReceived {
            client,
            app: envelope.app.clone(),
            kind: envelope.kind.clone(),
            len: envelope.data.len(),
        });
        self.route_binary(envelope);
    }

    fn on_registry_update(&self, update: &ClientUpdate) {
        if update.change == ClientChange::Removed {
            if let Some((_, pipe)) = self.inner.outbound.remove(&update.client_id) {
                pipe.close();
            }
            return;
        }
        if update.became_established() {
            self.resend_initial_data(&update.client_id);
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Register the subsystem for one server type
    pub fn register_subsystem(
        &self,
        ty: ServerType,
        subsystem: Arc<dyn ServerSubsystem>,
    ) -> Result<()> {
        let mut subsystems = self.inner.subsystems.write();
        if subsystems.contains_key(&ty) {
            return Err(RouterError::DuplicateSubsystem(ty.to_string()));
        }
        subsystems.insert(ty, subsystem);
        debug!("Subsystem registered for server/{}", ty);
        Ok(())
    }

    /// Register the handler for app → hub requests of one type
    pub fn register_handler(
        &self,
        kind: impl Into<String>,
        handler: Arc<dyn AppRequestHandler>,
    ) -> Result<()> {
        let kind = kind.into();
        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(&kind) {
            return Err(RouterError::DuplicateHandler(kind));
        }
        handlers.insert(kind, handler);
        Ok(())
    }

    /// Gate every envelope of `kind` to or from an app behind `authorizer`
    pub fn require_authorization(&self, kind: impl Into<String>, authorizer: Arc<dyn AppAuthorizer>) {
        self.inner.authorizers.write().insert(kind.into(), authorizer);
    }

    /// Whether `app_id` may exchange envelopes of `kind`
    pub fn is_authorized(&self, kind: &str, app_id: &str) -> bool {
        let authorizer = self.inner.authorizers.read().get(kind).cloned();
        authorizer.map_or(true, |a| a.is_authorized(app_id))
    }

    /// Dispatch an inbound envelope.
    ///
    /// Server envelopes go to the subsystem for their type, everything else
    /// to the app named by `app`. Returns whether anything took it.
    pub fn route(&self, envelope: Envelope) -> bool {
        match envelope.destination() {
            Err(e) => {
                warn!("Dropping envelope: {}", e);
                false
            }
            Ok(Destination::Server(ty)) => match self.subsystem(ty) {
                Some(subsystem) => {
                    subsystem.handle_data(self, envelope);
                    true
                }
                None => {
                    debug!("No subsystem for server/{}", ty);
                    false
                }
            },
            Ok(Destination::App(app_id)) => self.deliver(&app_id, AppDelivery::Data(envelope)),
        }
    }

    /// Dispatch an inbound binary envelope
    pub fn route_binary(&self, envelope: BinaryEnvelope) -> bool {
        match envelope.destination() {
            Err(e) => {
                warn!("Dropping binary envelope: {}", e);
                false
            }
            Ok(Destination::Server(ty)) => match self.subsystem(ty) {
                Some(subsystem) => {
                    subsystem.handle_binary(self, envelope);
                    true
                }
                None => {
                    debug!(
                        "No subsystem for binary server/{}, dropping {} bytes",
                        ty,
                        envelope.data.len()
                    );
                    false
                }
            },
            Ok(Destination::App(app_id)) => self.deliver(&app_id, AppDelivery::Binary(envelope)),
        }
    }

    fn subsystem(&self, ty: ServerType) -> Option<Arc<dyn ServerSubsystem>> {
        self.inner.subsystems.read().get(&ty).cloned()
    }

    fn deliver(&self, app_id: &str, delivery: AppDelivery) -> bool {
        if !self.is_authorized(delivery.kind(), app_id) {
            let err = Error::Unauthorized {
                app: app_id.to_string(),
                kind: delivery.kind().to_string(),
            };
            warn!("Dropping delivery: {}", err);
            return false;
        }
        match self.inner.apps.get(app_id) {
            Some(slot) => {
                slot.push(delivery);
                true
            }
            None => {
                debug!("App {} is not running, dropping {}", app_id, delivery.kind());
                false
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Queue an envelope for the client named by `client_id`.
    ///
    /// The primary provider is resolved here; the envelope stays bound to it
    /// even if the primary changes before the writer gets to it.
    pub fn send(&self, envelope: Envelope) -> SendOutcome {
        let Some(client_id) = envelope.client_id.clone() else {
            warn!(
                "Dropping {}/{}: no clientId to send to",
                envelope.app, envelope.kind
            );
            return SendOutcome::NoRoute;
        };
        let Some((provider, provider_id)) = self.inner.registry.resolve_route(&client_id) else {
            debug!("{}", Error::NoRoute(client_id));
            return SendOutcome::NoRoute;
        };

        let pipe = self.outbound_pipe(&client_id);
        pipe.push(Outbound {
            provider: provider.clone(),
            provider_id,
            envelope,
        });
        SendOutcome::Queued(provider)
    }

    /// [`Router::send`] addressed to `client_id`
    pub fn send_data_to_client(&self, client_id: &str, envelope: Envelope) -> bool {
        self.send(envelope.with_client(client_id)).is_queued()
    }

    /// Send a copy to every established client accepted by `filter`
    pub fn broadcast<F>(&self, envelope: &Envelope, filter: F) -> usize
    where
        F: Fn(&Client) -> bool,
    {
        self.inner
            .registry
            .get_clients()
            .iter()
            .filter(|client| client.is_established() && filter(client))
            .filter(|client| {
                self.send(envelope.clone().with_client(client.client_id.clone()))
                    .is_queued()
            })
            .count()
    }

    fn outbound_pipe(&self, client_id: &str) -> Arc<BoundedQueue<Outbound>> {
        let mut entry = self
            .inner
            .outbound
            .entry(client_id.to_string())
            .or_insert_with(|| self.spawn_writer(client_id));
        if entry.is_closed() {
            *entry = self.spawn_writer(client_id);
        }
        Arc::clone(entry.value())
    }

    fn spawn_writer(&self, client_id: &str) -> Arc<BoundedQueue<Outbound>> {
        let queue: Arc<BoundedQueue<Outbound>> = Arc::new(BoundedQueue::new(
            format!("client:{}", client_id),
            self.inner.config.outbound_queue_capacity,
        ));
        let drain = Arc::clone(&queue);
        let weak = self.downgrade();
        let client_id = client_id.to_string();

        tokio::spawn(async move {
            while let Some(out) = drain.pop().await {
                let Some(router) = weak.upgrade() else {
                    return;
                };
                let result = match router.provider(&out.provider) {
                    Some(provider) => provider
                        .transmit(&out.provider_id, &out.envelope)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err("provider detached".to_string()),
                };
                if let Err(reason) = result {
                    router.transmit_failed(&client_id, out, reason);
                }
            }
            debug!("Outbound pipe for {} closed", client_id);
        });
        queue
    }

    fn transmit_failed(&self, client_id: &str, out: Outbound, reason: String) {
        let err = Error::ProviderTransmitFailure {
            provider: out.provider.to_string(),
            reason: reason.clone(),
        };
        warn!("Send to {} failed: {}", client_id, err);
        self.inner.transmit_failure.emit(&TransmitFailure {
            client_id: client_id.to_string(),
            provider: out.provider,
            provider_id: out.provider_id,
            envelope: out.envelope,
            reason,
        });
    }

    /// Fan a binary envelope out to several apps.
    ///
    /// Every recipient but the last gets its own copy of the buffer; the last
    /// one (the only one, for a single app) gets the original.
    pub fn fan_out_binary(&self, app_ids: &[AppId], envelope: BinaryEnvelope) -> usize {
        let targets: Vec<&AppId> = app_ids
            .iter()
            .filter(|app_id| self.is_app_running(app_id))
            .filter(|app_id| self.is_authorized(&envelope.kind, app_id))
            .collect();
        let Some((last, rest)) = targets.split_last() else {
            debug!(
                "No running recipients for {} byte {}",
                envelope.data.len(),
                envelope.kind
            );
            return 0;
        };

        for app_id in rest {
            let mut copy = envelope.deep_copy();
            copy.app = app_id.to_string();
            self.deliver(app_id, AppDelivery::Binary(copy));
        }
        let mut envelope = envelope;
        envelope.app = last.to_string();
        self.deliver(last, AppDelivery::Binary(envelope));
        targets.len()
    }

    /// Hand a binary envelope to one app
    pub fn send_binary_to_app(&self, app_id: &str, envelope: BinaryEnvelope) -> bool {
        self.deliver(app_id, AppDelivery::Binary(envelope))
    }

    /// Hand an envelope to one app
    pub fn send_data_to_app(&self, app_id: &str, envelope: Envelope) -> bool {
        self.deliver(app_id, AppDelivery::Data(envelope))
    }

    /// Close every connection a client has
    pub fn disconnect(&self, client_id: &str) -> bool {
        let Some(client) = self.inner.registry.get_client(client_id) else {
            return false;
        };
        for (kind, identifier) in client.active_identifiers() {
            let Some(provider) = self.provider(kind) else {
                continue;
            };
            let provider_id = identifier.provider_id.clone();
            let kind = kind.clone();
            tokio::spawn(async move {
                if let Err(e) = provider.disconnect(&provider_id).await {
                    warn!("Disconnect {}:{} failed: {}", kind, provider_id, e);
                }
            });
        }
        info!("Disconnecting client {}", client_id);
        true
    }

    /// Push the connection bootstrap a device expects, then notify
    /// [`Router::on_initial_data`] listeners.
    pub fn resend_initial_data(&self, client_id: &str) -> bool {
        let envelopes = [
            Envelope::new(CLIENT_APP, "meta_data")
                .with_request("set")
                .with_payload(json!({ "connectionId": client_id })),
            Envelope::new(CLIENT_APP, "time")
                .with_request("set")
                .with_payload(json!({
                    "utcTime": time::now(),
                    "timezoneOffset": time::timezone_offset_minutes(),
                })),
            Envelope::new(CLIENT_APP, "get").with_request("manifest"),
        ];
        for envelope in envelopes {
            if !self.send_data_to_client(client_id, envelope) {
                debug!("Initial data for {} not sent: no route", client_id);
                return false;
            }
        }
        debug!("Initial data queued for {}", client_id);
        self.inner.initial_data.emit(&client_id.to_string());
        true
    }

    // =========================================================================
    // Apps
    // =========================================================================

    /// Start delivering to an app; replaces any inbox registered under the id
    pub fn register_app(&self, app_id: impl Into<AppId>, inbox: Arc<dyn AppInbox>) {
        let app_id = app_id.into();
        let slot = AppSlot::spawn(&app_id, inbox, self.inner.config.app_queue_capacity);
        if let Some(previous) = self.inner.apps.insert(app_id.clone(), slot) {
            previous.close();
        }
        info!("App {} running", app_id);
    }

    /// Stop delivering to an app; already queued entries are still delivered
    pub fn unregister_app(&self, app_id: &str) -> bool {
        match self.inner.apps.remove(app_id) {
            Some((_, slot)) => {
                slot.close();
                info!("App {} stopped", app_id);
                true
            }
            None => false,
        }
    }

    pub fn is_app_running(&self, app_id: &str) -> bool {
        self.inner.apps.contains_key(app_id)
    }

    pub fn running_apps(&self) -> Vec<AppId> {
        let mut apps: Vec<AppId> = self.inner.apps.iter().map(|e| e.key().clone()).collect();
        apps.sort();
        apps
    }

    /// Entries waiting in an app's inbox
    pub fn pending_for_app(&self, app_id: &str) -> usize {
        self.inner.apps.get(app_id).map_or(0, |slot| slot.pending())
    }

    /// Handle an envelope an app sent.
    ///
    /// Typed request handlers run first. Otherwise the envelope is stamped
    /// with the sender's id and unicast to `clientId`, or broadcast to every
    /// established client when it names none.
    ///
    /// A message of a gated type from an app without permission is dropped
    /// and logged, but reported as accepted so the sender learns nothing
    /// about the allow-list.
    pub fn handle_app_message(&self, app_id: &str, envelope: Envelope) -> bool {
        if !self.is_authorized(&envelope.kind, app_id) {
            let err = Error::Unauthorized {
                app: app_id.to_string(),
                kind: envelope.kind.clone(),
            };
            warn!("Blocking app message: {}", err);
            return true;
        }

        let handler = self.inner.handlers.read().get(&envelope.kind).cloned();
        if let Some(handler) = handler {
            handler.handle_app_request(self, app_id, envelope);
            return true;
        }

        let mut envelope = envelope;
        envelope.app = app_id.to_string();
        if let Err(e) = envelope.validate() {
            warn!("Dropping message from app {}: {}", app_id, e);
            return false;
        }
        if envelope.client_id.is_some() {
            self.send(envelope).is_queued()
        } else {
            self.broadcast(&envelope, |_| true) > 0
        }
    }

    // =========================================================================
    // Queries and events
    // =========================================================================

    pub fn get_clients(&self) -> Vec<Client> {
        self.inner.registry.get_clients()
    }

    pub fn get_client(&self, client_id: &str) -> Option<Client> {
        self.inner.registry.get_client(client_id)
    }

    pub fn on_client_list<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Vec<Client>) + Send + Sync + 'static,
    {
        self.inner.registry.on_client_list_changed(listener)
    }

    pub fn on_client_update<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&ClientUpdate) + Send + Sync + 'static,
    {
        self.inner.registry.on_connection_fact(listener)
    }

    pub fn on_data_received<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&DataReceived) + Send + Sync + 'static,
    {
        self.inner.data_received.subscribe(listener)
    }

    pub fn on_binary_received<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&BinaryReceived) + Send + Sync + 'static,
    {
        self.inner.binary_received.subscribe(listener)
    }

    pub fn on_transmit_failure<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&TransmitFailure) + Send + Sync + 'static,
    {
        self.inner.transmit_failure.subscribe(listener)
    }

    /// Fires after the bootstrap envelopes for a client were queued
    pub fn on_initial_data<F>(&self, listener: F) -> SubscriptionHandle
    where
        F: Fn(&ClientId) + Send + Sync + 'static,
    {
        self.inner.initial_data.subscribe(listener)
    }

    /// Stop provider tasks and close every queue
    pub fn shutdown(&self) {
        let kinds: Vec<ProviderKind> = self.providers();
        for kind in kinds {
            if let Some((_, slot)) = self.inner.providers.remove(&kind) {
                slot.task.abort();
            }
        }
        let apps: Vec<AppId> = self.running_apps();
        for app_id in apps {
            self.unregister_app(&app_id);
        }
        self.inner.outbound.iter().for_each(|pipe| pipe.close());
        self.inner.outbound.clear();
        info!("Router '{}' shut down", self.inner.config.name);
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.inner.config.name)
            .field("providers", &self.providers())
            .field("apps", &self.running_apps())
            .field("clients", &self.inner.registry.len())
            .finish()
    }
}
