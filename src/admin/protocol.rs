//! Wire schema of the admin websocket (§6.3).

use serde::{Deserialize, Serialize};

use crate::registry::PluginInstanceSnapshot;

#[derive(Serialize)]
pub struct SystemInfoMessage {
    pub system_info: SystemInfo,
}

#[derive(Serialize)]
pub struct SystemInfo {
    pub plugin_instances: Vec<PluginInstanceSnapshot>,
}

#[derive(Serialize)]
pub struct NotificationMessage {
    pub notification: Notification,
}

#[derive(Serialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    ModuleStatusUpdate {
        plugin_instance: String,
        module: String,
        new_status: Option<String>,
    },
    ModuleMessageUpdate {
        plugin_instance: String,
        module: String,
        new_message: Option<String>,
    },
    ModuleActiveActionsUpdate {
        plugin_instance: String,
        module: String,
        new_active_actions: Vec<String>,
    },
}

#[derive(Deserialize)]
pub struct ClientRequestEnvelope {
    pub request: ClientRequest,
}

#[derive(Deserialize)]
pub struct ClientRequest {
    #[allow(dead_code)]
    pub request_id: String,
    pub body: ClientRequestBody,
}

#[derive(Deserialize)]
pub struct ClientRequestBody {
    pub call_action: CallActionBody,
}

#[derive(Deserialize)]
pub struct CallActionBody {
    pub plugin_instance: String,
    pub module: String,
    pub action: String,
}

/// A text frame's meaning, resolved once (§4.6, §6.3). `"ping"`/`"pong"`
/// arrive JSON-encoded (quoted); `Password <pw>` is a literal, unquoted
/// prefix; anything else is parsed as a [`ClientRequestEnvelope`].
pub enum ClientFrame {
    Password(String),
    Pong,
    Ping,
    Request(ClientRequest),
    Unrecognized,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Self {
        if let Some(password) = text.strip_prefix("Password ") {
            return ClientFrame::Password(password.to_string());
        }
        if let Ok(s) = serde_json::from_str::<String>(text) {
            return match s.as_str() {
                "pong" => ClientFrame::Pong,
                "ping" => ClientFrame::Ping,
                _ => ClientFrame::Unrecognized,
            };
        }
        match serde_json::from_str::<ClientRequestEnvelope>(text) {
            Ok(envelope) => ClientFrame::Request(envelope.request),
            Err(_) => ClientFrame::Unrecognized,
        }
    }
}

pub fn encode_ping() -> String {
    serde_json::to_string("ping").expect("string serialization cannot fail")
}

pub fn encode_pong() -> String {
    serde_json::to_string("pong").expect("string serialization cannot fail")
}

pub fn encode_system_info(plugin_instances: Vec<PluginInstanceSnapshot>) -> String {
    serde_json::to_string(&SystemInfoMessage {
        system_info: SystemInfo { plugin_instances },
    })
    .expect("system_info serialization cannot fail")
}

pub fn encode_notification(notification: Notification) -> String {
    serde_json::to_string(&NotificationMessage { notification })
        .expect("notification serialization cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_frame_keeps_verbatim_suffix() {
        match ClientFrame::parse("Password hunter2 with spaces") {
            ClientFrame::Password(p) => assert_eq!(p, "hunter2 with spaces"),
            _ => panic!("expected Password variant"),
        }
    }

    #[test]
    fn quoted_pong_is_recognized() {
        assert!(matches!(ClientFrame::parse("\"pong\""), ClientFrame::Pong));
    }

    #[test]
    fn call_action_request_round_trips() {
        let text = r#"{"request":{"request_id":"7","body":{"call_action":{"plugin_instance":"vnc-10","module":"vnc-10","action":"stop"}}}}"#;
        match ClientFrame::parse(text) {
            ClientFrame::Request(req) => {
                assert_eq!(req.request_id, "7");
                assert_eq!(req.body.call_action.action, "stop");
            }
            _ => panic!("expected Request variant"),
        }
    }

    #[test]
    fn notification_serializes_as_externally_tagged_snake_case() {
        let json = encode_notification(Notification::ModuleStatusUpdate {
            plugin_instance: "vnc-10".into(),
            module: "vnc-10".into(),
            new_status: Some("active".into()),
        });
        assert!(json.contains("\"module_status_update\""));
        assert!(json.contains("\"new_status\":\"active\""));
    }
}
