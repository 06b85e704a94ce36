//! Bridge between the gateway and the Python backend.
//!
//! Application commands are forwarded over HTTP. A successful backend call
//! is announced on the hub; a failed one is not.

pub mod client;

pub use client::{BridgeClient, BridgeError, Endpoint};

use jc_hub::{Event, EventHub, EventKind, Payload};
use serde_json::Value;
use tracing::{debug, warn};

/// Backend client plus the hub that announces its results.
#[derive(Clone)]
pub struct Bridge {
    client: BridgeClient,
    hub: EventHub,
}

impl Bridge {
    pub fn new(client: BridgeClient, hub: EventHub) -> Self {
        Self { client, hub }
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }

    pub async fn send_chat(&self, request: Value) -> Result<Value, BridgeError> {
        let response = self.client.send_chat(&request).await?;
        self.announce(EventKind::ChatMessage, request, &response);
        Ok(response)
    }

    pub async fn load_model(&self, request: Value) -> Result<Value, BridgeError> {
        let response = self.client.load_model(&request).await?;
        self.announce(EventKind::ModelLoaded, request, &response);
        Ok(response)
    }

    pub async fn toggle_plugin(&self, request: Value) -> Result<Value, BridgeError> {
        let response = self.client.toggle_plugin(&request).await?;
        self.announce(EventKind::PluginToggled, request, &response);
        Ok(response)
    }

    pub async fn start_training(&self, request: Value) -> Result<Value, BridgeError> {
        let response = self.client.start_training(&request).await?;
        self.announce(EventKind::TrainingStarted, request, &response);
        Ok(response)
    }

    pub async fn add_command(&self, request: Value) -> Result<Value, BridgeError> {
        let response = self.client.add_command(&request).await?;
        self.announce(EventKind::CommandAdded, request, &response);
        Ok(response)
    }

    pub async fn delete_command(&self, name: &str) -> Result<Value, BridgeError> {
        let response = self.client.delete_command(name).await?;
        self.announce(
            EventKind::CommandDeleted,
            serde_json::json!({ "name": name }),
            &response,
        );
        Ok(response)
    }

    fn announce(&self, kind: EventKind, request: Value, response: &Value) {
        let event = Event::new(kind, announcement(request, response));
        if self.hub.broadcast(event) {
            debug!(event_type = kind.as_str(), "Backend result broadcast");
        } else {
            warn!(event_type = kind.as_str(), "Backend result not broadcast");
        }
    }
}

/// Event payload for a forwarded command: the request fields, with the
/// backend's answer under `result`.
fn announcement(request: Value, response: &Value) -> Payload {
    let mut payload = match request {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("request".to_string(), other);
            map
        }
    };
    if !response.is_null() {
        payload.insert("result".to_string(), response.clone());
    }
    payload
}
