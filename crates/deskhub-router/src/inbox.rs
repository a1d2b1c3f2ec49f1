//! App inbox contract
//!
//! Apps run outside the router; it only needs somewhere to hand envelopes.
//! Each registered app gets a drop-oldest queue drained by one task, so a
//! slow app only ever loses its own oldest messages.

use async_trait::async_trait;
use deskhub_core::{AppId, BinaryEnvelope, Envelope};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::queue::BoundedQueue;

/// What the router hands an app
#[derive(Debug)]
pub enum AppDelivery {
    Data(Envelope),
    Binary(BinaryEnvelope),
}

impl AppDelivery {
    /// Envelope type, for logging and authorization
    pub fn kind(&self) -> &str {
        match self {
            AppDelivery::Data(envelope) => &envelope.kind,
            AppDelivery::Binary(envelope) => &envelope.kind,
        }
    }
}

/// Receiving end of an app process
#[async_trait]
pub trait AppInbox: Send + Sync {
    async fn deliver(&self, delivery: AppDelivery);
}

/// A registered app: its queue and the task draining it
pub(crate) struct AppSlot {
    queue: Arc<BoundedQueue<AppDelivery>>,
    task: JoinHandle<()>,
}

impl AppSlot {
    pub(crate) fn spawn(app_id: &AppId, inbox: Arc<dyn AppInbox>, capacity: usize) -> Self {
        let queue = Arc::new(BoundedQueue::new(format!("app:{}", app_id), capacity));
        let drain = Arc::clone(&queue);
        let id = app_id.clone();
        let task = tokio::spawn(async move {
            while let Some(delivery) = drain.pop().await {
                inbox.deliver(delivery).await;
            }
            debug!("Inbox for app {} drained", id);
        });
        Self { queue, task }
    }

    pub(crate) fn push(&self, delivery: AppDelivery) {
        // Overflow is logged by the queue
        let _ = self.queue.push(delivery);
    }

    pub(crate) fn close(self) {
        self.queue.close();
        drop(self.task);
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }
}
