use super::{truthy, TraitHandler};
use crate::model::{DeviceState, EndpointOptions, GoogleCommand, GoogleTrait};
use serde_json::json;
use std::collections::HashSet;

pub struct OnOffHandler;

impl TraitHandler for OnOffHandler {
    fn trait_id(&self) -> GoogleTrait {
        GoogleTrait::OnOff
    }

    fn supports(&self, exposes: &HashSet<String>, _options: Option<&EndpointOptions>) -> bool {
        ["switch", "relay", "outlet", "lock", "light", "dimmable_light", "color_light"]
            .iter()
            .any(|e| exposes.contains(*e))
    }

    fn attributes(
        &self,
        _exposes: &HashSet<String>,
        _options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value> {
        None
    }

    fn state(&self, state: &DeviceState) -> Option<DeviceState> {
        let on = state
            .get("on")
            .map(truthy)
            .or_else(|| state.get("status").map(truthy))
            .or_else(|| state.get("state").map(truthy))
            .or_else(|| state.get("power").map(truthy))?;
        Some(DeviceState::from([("on".to_string(), json!(on))]))
    }

    fn map_command(
        &self,
        _device_key: &str,
        command: &GoogleCommand,
        _endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value> {
        match command {
            GoogleCommand::OnOff { on } => {
                Some(json!({ "status": if *on { "on" } else { "off" } }))
            }
            _ => None,
        }
    }
}
