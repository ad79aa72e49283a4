//! Google Smart Home fulfillment request/response shapes.
//!
//! Mirrors the teacher's `#[serde(deny_unknown_fields)]` strictness for
//! inbound bodies (`nexus-api`'s request structs) and models the intent
//! union as a sum type per spec.md §9, dispatched by variant rather than by
//! sniffing an untyped `intent` string field by hand.

use homed_devices::model::{ExecutionGroup, GoogleDevice, GoogleDeviceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ requestId, inputs: [oneOf] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FulfillmentRequest {
    pub request_id: String,
    pub inputs: Vec<Intent>,
}

/// The four fulfillment intents. Adjacently tagged on
/// `intent`/`payload` to match Google's actual wire shape; unit variants
/// (SYNC, DISCONNECT) tolerate a missing `payload` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "intent", content = "payload")]
pub enum Intent {
    #[serde(rename = "action.devices.SYNC")]
    Sync,
    #[serde(rename = "action.devices.QUERY")]
    Query { devices: Vec<GoogleDeviceRef> },
    #[serde(rename = "action.devices.EXECUTE")]
    Execute { commands: Vec<ExecutionGroup> },
    #[serde(rename = "action.devices.DISCONNECT")]
    Disconnect,
}

/// `{ requestId, payload }` — the envelope common to every fulfillment
/// response.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentResponse {
    pub request_id: String,
    pub payload: Value,
}

/// One entry of an EXECUTE response's `commands` array.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCommandResult {
    pub ids: Vec<String>,
    pub status: ExecuteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecuteStatus {
    Success,
    Offline,
}

/// `{ agentUserId, devices }` — the SYNC response payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub agent_user_id: String,
    pub devices: Vec<GoogleDevice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_and_disconnect_parse_without_a_payload_key() {
        let sync = serde_json::json!({"requestId": "r-1", "inputs": [{"intent": "action.devices.SYNC"}]});
        let parsed: FulfillmentRequest = serde_json::from_value(sync).unwrap();
        assert!(matches!(parsed.inputs[0], Intent::Sync));

        let disconnect =
            serde_json::json!({"requestId": "r-2", "inputs": [{"intent": "action.devices.DISCONNECT"}]});
        let parsed: FulfillmentRequest = serde_json::from_value(disconnect).unwrap();
        assert!(matches!(parsed.inputs[0], Intent::Disconnect));
    }

    #[test]
    fn query_requires_a_devices_payload() {
        let query = serde_json::json!({
            "requestId": "r-3",
            "inputs": [{"intent": "action.devices.QUERY", "payload": {"devices": [{"id": "c-1/dev1"}]}}],
        });
        let parsed: FulfillmentRequest = serde_json::from_value(query).unwrap();
        match &parsed.inputs[0] {
            Intent::Query { devices } => assert_eq!(devices[0].id, "c-1/dev1"),
            other => panic!("expected Query, got {other:?}"),
        }
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let body = serde_json::json!({
            "requestId": "r-4",
            "inputs": [{"intent": "action.devices.SYNC"}],
            "extra": true,
        });
        assert!(serde_json::from_value::<FulfillmentRequest>(body).is_err());
    }
}
