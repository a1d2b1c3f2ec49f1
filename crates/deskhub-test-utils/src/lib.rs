//! Common test helpers for DeskHub tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A recording transport provider with failure injection
//! - A recording app inbox that can be paused to build up backpressure
//! - Event collectors for router and registry topics
//! - Connection fact builders

use async_trait::async_trait;
use deskhub_core::{
    BinaryEnvelope, ClientManifest, ConnectionFact, ConnectionState, Envelope, ProviderKind,
    ProviderMeta,
};
use deskhub_router::{AppDelivery, AppInbox, Router};
use deskhub_transport::{ProviderSink, TransportError, TransportProvider};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout. Uses the tokio clock, so it also works
/// under a paused runtime.
pub async fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    loop {
        if check() {
            return true;
        }
        if start.elapsed() >= max_wait {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait with the default interval and timeout
pub async fn eventually<F>(check: F) -> bool
where
    F: Fn() -> bool,
{
    wait_for(check, DEFAULT_CHECK_INTERVAL, DEFAULT_TIMEOUT).await
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || counter.load(Ordering::SeqCst) >= target,
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

// ============================================================================
// Fact Builders
// ============================================================================

pub fn usb() -> ProviderKind {
    ProviderKind::usb_bridge()
}

pub fn socket() -> ProviderKind {
    ProviderKind::network_socket()
}

/// A bare fact
pub fn fact(kind: ProviderKind, provider_id: &str, state: ConnectionState) -> ConnectionFact {
    ConnectionFact::new(kind, provider_id, state)
}

/// A fact carrying a manifest with the given name
pub fn named_fact(
    kind: ProviderKind,
    provider_id: &str,
    state: ConnectionState,
    name: &str,
) -> ConnectionFact {
    fact(kind, provider_id, state).with_manifest(ClientManifest::named(name))
}

/// Metadata carrying only a socket latency
pub fn latency(ms: u32) -> ProviderMeta {
    ProviderMeta {
        socket_latency_ms: Some(ms),
        ..Default::default()
    }
}

// ============================================================================
// Recording Provider
// ============================================================================

/// Transport double that records every transmit. `pause` holds transmits
/// back so the client's outbound pipe fills up.
pub struct RecordingProvider {
    kind: ProviderKind,
    sent: Mutex<Vec<(String, Envelope)>>,
    disconnects: Mutex<Vec<String>>,
    failing: AtomicBool,
    paused: AtomicBool,
    resume: Notify,
    count: AtomicU32,
}

impl RecordingProvider {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sent: Mutex::new(Vec::new()),
            disconnects: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            count: AtomicU32::new(0),
        })
    }

    /// Create a provider, attach it to `router` and return its sink
    pub fn attach(router: &Router, kind: ProviderKind) -> (Arc<Self>, ProviderSink) {
        let provider = Self::new(kind.clone());
        let (sink, events) = router.provider_channel(kind);
        router
            .attach_provider(provider.clone(), events)
            .expect("provider attach failed");
        (provider, sink)
    }

    /// Make every transmit fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }

    /// Everything transmitted so far, as (provider_id, envelope)
    pub fn sent(&self) -> Vec<(String, Envelope)> {
        self.sent.lock().clone()
    }

    /// Envelopes transmitted to one endpoint
    pub fn sent_to(&self, provider_id: &str) -> Vec<Envelope> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == provider_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Envelopes of one type transmitted to any endpoint
    pub fn sent_of_type(&self, kind: &str) -> Vec<Envelope> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().clone()
    }

    /// Number of transmit attempts, failed ones included
    pub fn attempts(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least `n` transmit attempts
    pub async fn wait_for_attempts(&self, n: u32) -> bool {
        wait_for_count(&self.count, n, DEFAULT_TIMEOUT).await
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportProvider for RecordingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind.clone()
    }

    async fn transmit(&self, provider_id: &str, envelope: &Envelope) -> deskhub_transport::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        while self.paused.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected failure".into()));
        }
        self.sent
            .lock()
            .push((provider_id.to_string(), envelope.clone()));
        Ok(())
    }

    async fn disconnect(&self, provider_id: &str) -> deskhub_transport::Result<()> {
        self.disconnects.lock().push(provider_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Recording Inbox
// ============================================================================

/// App inbox double. Starts open; `pause` holds deliveries back so the
/// router-side queue fills up.
pub struct RecordingInbox {
    deliveries: Mutex<Vec<AppDelivery>>,
    paused: AtomicBool,
    resume: Notify,
    count: AtomicU32,
}

impl RecordingInbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            count: AtomicU32::new(0),
        })
    }

    /// Register a fresh inbox with `router` under `app_id`
    pub fn register(router: &Router, app_id: &str) -> Arc<Self> {
        let inbox = Self::new();
        router.register_app(app_id, inbox.clone());
        inbox
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_one();
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn wait_for_count(&self, n: u32) -> bool {
        wait_for_count(&self.count, n, DEFAULT_TIMEOUT).await
    }

    /// Data envelopes received so far
    pub fn data(&self) -> Vec<Envelope> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                AppDelivery::Data(e) => Some(e.clone()),
                AppDelivery::Binary(_) => None,
            })
            .collect()
    }

    /// Take every delivery received so far
    pub fn take(&self) -> Vec<AppDelivery> {
        std::mem::take(&mut *self.deliveries.lock())
    }

    /// Take only the binary deliveries
    pub fn take_binary(&self) -> Vec<BinaryEnvelope> {
        self.take()
            .into_iter()
            .filter_map(|d| match d {
                AppDelivery::Binary(b) => Some(b),
                AppDelivery::Data(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl AppInbox for RecordingInbox {
    async fn deliver(&self, delivery: AppDelivery) {
        while self.paused.load(Ordering::SeqCst) {
            self.resume.notified().await;
        }
        self.deliveries.lock().push(delivery);
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Event Collector
// ============================================================================

/// Collects topic events for later inspection
pub struct Collector<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Listener to pass to a `subscribe`/`on_*` call
    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &T| events.lock().push(event.clone())
    }

    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<T: Clone + Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}
