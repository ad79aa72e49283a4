//! JSON message shapes exchanged over the framed, encrypted wire.
//!
//! Strict `#[serde(deny_unknown_fields)]` structs where the protocol is
//! strict (the auth handshake), loosely typed passthrough where the
//! gateway's own device metadata is free-form (`DeviceInfo`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The very first encrypted message a gateway sends, before any topic-based
/// traffic: both fields required, no unknown fields tolerated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AuthMessage {
    pub unique_id: String,
    pub token: String,
}

/// A client → server message once authorized: `{ topic, message? }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientMessage {
    pub topic: String,
    #[serde(default)]
    pub message: Option<Value>,
}

/// A server → client message: subscribe to a topic, or publish to one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerMessage {
    pub action: ServerAction,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerAction {
    Subscribe,
    Publish,
}

impl ServerMessage {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self { action: ServerAction::Subscribe, topic: topic.into(), message: None }
    }

    pub fn publish(topic: impl Into<String>, message: Value) -> Self {
        Self { action: ServerAction::Publish, topic: topic.into(), message: Some(message) }
    }
}

/// The four recognized topic prefixes an authorized connection routes on
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Status,
    Expose,
    Device,
    Fd,
}

impl TopicKind {
    /// Classify a topic string by its prefix, returning `None` for any
    /// topic that doesn't start with one of the four known prefixes
    ///.
    pub fn classify(topic: &str) -> Option<Self> {
        if topic.starts_with("status/") {
            Some(Self::Status)
        } else if topic.starts_with("expose/") {
            Some(Self::Expose)
        } else if topic.starts_with("device/") {
            Some(Self::Device)
        } else if topic.starts_with("fd/") {
            Some(Self::Fd)
        } else {
            None
        }
    }
}

/// `status/<clientId>` payload: a batch of device metadata.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StatusMessage {
    #[serde(default)]
    pub devices: Option<Vec<DeviceInfo>>,
    #[serde(default)]
    pub names: Option<bool>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Loosely-typed device metadata within a status message. `version` is coerced to a string because
/// gateways have been observed sending it as either a string or a number.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub ieee_address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_stringish")]
    pub version: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub last_seen: Option<f64>,
    #[serde(default)]
    pub link_quality: Option<f64>,
}

fn deserialize_optional_stringish<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    }))
}

/// `expose/<device>` payload: mapping of endpoint id (as a string key in
/// JSON) to its declared items and options.
pub type ExposeMessage = HashMap<String, EndpointExposeInfo>;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EndpointExposeInfo {
    pub items: Vec<String>,
    #[serde(default)]
    pub options: Option<Value>,
}

/// `device/<device>` payload: online/offline status.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusMessage {
    pub status: String,
    #[serde(default)]
    pub last_seen: Option<f64>,
}

/// `fd/<device>` payload: mapping of expose-name to opaque JSON value.
pub type DeviceStateMessage = HashMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_message_requires_both_fields_and_rejects_unknown() {
        let ok = r#"{"uniqueId":"c-1","token":"t-1"}"#;
        let parsed: AuthMessage = serde_json::from_str(ok).unwrap();
        assert_eq!(parsed.unique_id, "c-1");
        assert_eq!(parsed.token, "t-1");

        let missing_token = r#"{"uniqueId":"c-1"}"#;
        assert!(serde_json::from_str::<AuthMessage>(missing_token).is_err());

        let unknown_field = r#"{"uniqueId":"c-1","token":"t-1","extra":true}"#;
        assert!(serde_json::from_str::<AuthMessage>(unknown_field).is_err());
    }

    #[test]
    fn topic_kind_classifies_known_prefixes() {
        assert_eq!(TopicKind::classify("status/c-1"), Some(TopicKind::Status));
        assert_eq!(TopicKind::classify("expose/dev1"), Some(TopicKind::Expose));
        assert_eq!(TopicKind::classify("device/dev1"), Some(TopicKind::Device));
        assert_eq!(TopicKind::classify("fd/dev1"), Some(TopicKind::Fd));
        assert_eq!(TopicKind::classify("command/cloud"), None);
    }

    #[test]
    fn device_info_coerces_numeric_version_to_string() {
        let json = r#"{"ieeeAddress":"0x00","version":42}"#;
        let info: DeviceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.version.as_deref(), Some("42"));
    }
}
