//! Voice-agent fan-out
//!
//! Device audio (`server/audio`) reaches only the apps on the allow-list.
//! Binary frames are handed over without a copy when a single agent app is
//! running; with several, each gets its own buffer. Session control and app
//! replies travel as `agent` envelopes, gated by the same allow-list.

use deskhub_core::{
    AgentReply, AgentRequest, AppId, BinaryEnvelope, Envelope, ServerType, CLIENT_APP,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::router::{AppAuthorizer, AppRequestHandler, Router, ServerSubsystem};

/// Envelope type of every agent exchange with apps and devices
pub const AGENT_TYPE: &str = "agent";

pub struct AgentFanout {
    allow_list: RwLock<Vec<AppId>>,
}

impl AgentFanout {
    /// Take over `server/audio` and gate `agent` traffic
    pub fn install<I, S>(router: &Router, allow_list: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<AppId>,
    {
        let agent = Arc::new(Self {
            allow_list: RwLock::new(Vec::new()),
        });
        agent.set_allow_list(allow_list);

        router.register_subsystem(ServerType::Audio, agent.clone())?;
        router.register_handler(AGENT_TYPE, agent.clone())?;
        router.require_authorization(AGENT_TYPE, agent.clone());
        Ok(agent)
    }

    /// Replace the allow-list
    pub fn set_allow_list<I, S>(&self, apps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<AppId>,
    {
        let mut list: Vec<AppId> = Vec::new();
        for app in apps {
            let app = app.into();
            if !list.contains(&app) {
                list.push(app);
            }
        }
        info!("Agent allow-list: {:?}", list);
        *self.allow_list.write() = list;
    }

    pub fn allow_list(&self) -> Vec<AppId> {
        self.allow_list.read().clone()
    }

    pub fn is_allowed(&self, app_id: &str) -> bool {
        self.allow_list.read().iter().any(|a| a == app_id)
    }

    /// Allow-listed apps that are currently running, in allow-list order
    fn recipients(&self, router: &Router) -> Vec<AppId> {
        let allowed = self.allow_list();
        if allowed.is_empty() {
            warn!("No voice agent apps configured");
            return allowed;
        }
        allowed
            .into_iter()
            .filter(|app_id| router.is_app_running(app_id))
            .collect()
    }

    fn session_control(&self, router: &Router, client_id: &str, envelope: Envelope) {
        let Some(request) = envelope.request().and_then(AgentRequest::parse) else {
            debug!(
                "Ignoring audio request {:?} from {}",
                envelope.request, client_id
            );
            return;
        };

        let recipients = self.recipients(router);
        debug!(
            "Agent session {} for {} -> {} apps",
            request.as_str(),
            client_id,
            recipients.len()
        );
        for app_id in recipients {
            let mut message = Envelope::new(app_id.clone(), AGENT_TYPE)
                .with_request(request.as_str())
                .with_client(client_id);
            message.payload = session_payload(request, envelope.payload.as_ref());
            router.send_data_to_app(&app_id, message);
        }
    }

    fn reply(&self, router: &Router, app_id: &str, envelope: Envelope) {
        let Some(reply) = envelope.request().and_then(AgentReply::parse) else {
            warn!(
                "Unknown agent request {:?} from app {}",
                envelope.request, app_id
            );
            return;
        };
        let Some(payload) = envelope.payload else {
            warn!("Malformed agent {} from app {}: no payload", reply.as_str(), app_id);
            return;
        };

        let Some(client_id) = reply_target(reply, &payload).or(envelope.client_id) else {
            warn!("No clientId in agent {} from app {}", reply.as_str(), app_id);
            return;
        };

        let payload = match reply {
            AgentReply::Disconnect => Value::String("You have been disconnected".to_string()),
            _ => payload,
        };
        let message = Envelope::new(CLIENT_APP, AGENT_TYPE)
            .with_request(reply.as_str())
            .with_payload(payload);
        if !router.send_data_to_client(&client_id, message) {
            warn!(
                "Failed to send agent {} to client {}",
                reply.as_str(),
                client_id
            );
        }
    }
}

/// Payload forwarded to agent apps; only `delete` carries the device's own
fn session_payload(request: AgentRequest, device: Option<&Value>) -> Option<Value> {
    let note = match request {
        AgentRequest::Start => "Audio session started",
        AgentRequest::End => "Audio session ended",
        AgentRequest::Clear | AgentRequest::Fetch => "none given",
        AgentRequest::Delete => return device.cloned(),
    };
    Some(Value::String(note.to_string()))
}

/// Client a reply is addressed to, as carried in its payload
fn reply_target(reply: AgentReply, payload: &Value) -> Option<String> {
    let target = match reply {
        AgentReply::Disconnect => payload.as_str(),
        AgentReply::Context => payload
            .as_array()
            .and_then(|messages| messages.first())
            .and_then(|m| m.get("clientId"))
            .and_then(Value::as_str),
        AgentReply::Response | AgentReply::Token => {
            payload.get("clientId").and_then(Value::as_str)
        }
    };
    target.filter(|id| !id.is_empty()).map(str::to_string)
}

impl AppAuthorizer for AgentFanout {
    fn is_authorized(&self, app_id: &str) -> bool {
        self.is_allowed(app_id)
    }
}

impl ServerSubsystem for AgentFanout {
    fn handle_data(&self, router: &Router, envelope: Envelope) {
        let Some(client_id) = envelope.client_id.clone() else {
            debug!("Dropping server/audio without a client");
            return;
        };
        self.session_control(router, &client_id, envelope);
    }

    fn handle_binary(&self, router: &Router, envelope: BinaryEnvelope) {
        let recipients = self.recipients(router);
        if recipients.is_empty() {
            debug!(
                "No running agent app, dropping {} bytes of audio",
                envelope.data.len()
            );
            return;
        }

        let mut audio = BinaryEnvelope::new(String::new(), AGENT_TYPE, envelope.data)
            .with_request("binary");
        audio.client_id = envelope.client_id;
        router.fan_out_binary(&recipients, audio);
    }
}

impl AppRequestHandler for AgentFanout {
    fn handle_app_request(&self, router: &Router, app_id: &str, envelope: Envelope) {
        if !self.is_allowed(app_id) {
            warn!(
                "Unauthorized agent request from app {}, add it to the agent allow-list",
                app_id
            );
            return;
        }
        self.reply(router, app_id, envelope);
    }
}
