use super::TraitHandler;
use crate::model::{DeviceState, EndpointOptions, GoogleCommand, GoogleTrait};
use serde_json::json;
use std::collections::HashSet;

pub const COVER_FAMILY_EXPOSES: [&str; 4] = ["cover", "blinds", "curtain", "shutter"];

pub struct OpenCloseHandler;

impl TraitHandler for OpenCloseHandler {
    fn trait_id(&self) -> GoogleTrait {
        GoogleTrait::OpenClose
    }

    fn supports(&self, exposes: &HashSet<String>, _options: Option<&EndpointOptions>) -> bool {
        COVER_FAMILY_EXPOSES.iter().any(|e| exposes.contains(*e))
    }

    fn attributes(
        &self,
        _exposes: &HashSet<String>,
        _options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value> {
        None
    }

    fn state(&self, state: &DeviceState) -> Option<DeviceState> {
        let position = if let Some(p) = state.get("position").and_then(|v| v.as_f64()) {
            p.clamp(0.0, 100.0).round() as i64
        } else if let Some(s) = state.get("state").and_then(|v| v.as_str()) {
            match s {
                "open" => 100,
                "closed" => 0,
                _ => 50,
            }
        } else {
            return None;
        };
        Some(DeviceState::from([("position".to_string(), json!(position))]))
    }

    fn map_command(
        &self,
        _device_key: &str,
        command: &GoogleCommand,
        _endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value> {
        match command {
            GoogleCommand::OpenClose { open_percent } => {
                Some(json!({ "position": (*open_percent).clamp(0, 100) }))
            }
            _ => None,
        }
    }
}
