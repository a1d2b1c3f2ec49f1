//! Built-in server subsystem

use deskhub_core::{ClientManifest, Envelope, ServerType, CLIENT_APP};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::router::{Router, ServerSubsystem};

/// Handles `ping`, `manifest`, `get` and `log`
pub struct CoreService;

impl CoreService {
    pub const SERVER_TYPES: [ServerType; 4] = [
        ServerType::Ping,
        ServerType::Manifest,
        ServerType::Get,
        ServerType::Log,
    ];

    fn ping(router: &Router, client_id: &str, envelope: Envelope) {
        let mut pong = Envelope::new(CLIENT_APP, ServerType::Pong.as_str());
        pong.payload = envelope.payload;
        router.send_data_to_client(client_id, pong);
    }

    fn manifest(router: &Router, client_id: &str, envelope: Envelope) {
        let Some(payload) = envelope.payload else {
            warn!("Manifest from {} has no payload", client_id);
            return;
        };
        match serde_json::from_value::<ClientManifest>(payload) {
            Ok(manifest) => {
                router.registry().update_manifest(client_id, manifest);
            }
            Err(e) => warn!("Invalid manifest from {}: {}", client_id, e),
        }
    }

    fn get(router: &Router, client_id: &str, envelope: Envelope) {
        match envelope.request() {
            Some("initialData") => {
                router.resend_initial_data(client_id);
            }
            other => debug!("Unhandled get {:?} from {}", other, client_id),
        }
    }

    fn log(client_id: &str, envelope: Envelope) {
        let message = match &envelope.payload {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        match envelope.request().unwrap_or("info") {
            "error" | "fatal" => error!(client = client_id, "{}", message),
            "warn" | "warning" => warn!(client = client_id, "{}", message),
            "debug" => debug!(client = client_id, "{}", message),
            "trace" => trace!(client = client_id, "{}", message),
            _ => info!(client = client_id, "{}", message),
        }
    }
}

impl ServerSubsystem for CoreService {
    fn handle_data(&self, router: &Router, envelope: Envelope) {
        let Some(client_id) = envelope.client_id.clone() else {
            debug!("Dropping server/{} without a client", envelope.kind);
            return;
        };
        match ServerType::parse(&envelope.kind) {
            Some(ServerType::Ping) => Self::ping(router, &client_id, envelope),
            Some(ServerType::Manifest) => Self::manifest(router, &client_id, envelope),
            Some(ServerType::Get) => Self::get(router, &client_id, envelope),
            Some(ServerType::Log) => Self::log(&client_id, envelope),
            _ => debug!("Core service ignoring server/{}", envelope.kind),
        }
    }
}
