use super::TraitHandler;
use crate::model::{DeviceState, EndpointOptions, GoogleCommand, GoogleTrait};
use serde_json::json;
use std::collections::HashSet;

const POWER_MONITORING_EXPOSES: [&str; 4] = ["power", "energy", "voltage", "current"];

pub struct BrightnessHandler;

impl TraitHandler for BrightnessHandler {
    fn trait_id(&self) -> GoogleTrait {
        GoogleTrait::Brightness
    }

    fn supports(&self, exposes: &HashSet<String>, options: Option<&EndpointOptions>) -> bool {
        if exposes.contains("dimmable_light") || exposes.contains("color_light") || exposes.contains("brightness") {
            return true;
        }
        if exposes.contains("light") {
            let has_level = options.is_some_and(|o| o.light_has("level"));
            let has_power_monitoring = POWER_MONITORING_EXPOSES.iter().any(|e| exposes.contains(*e));
            return has_level && !has_power_monitoring;
        }
        false
    }

    fn attributes(
        &self,
        _exposes: &HashSet<String>,
        _options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value> {
        None
    }

    fn state(&self, state: &DeviceState) -> Option<DeviceState> {
        let brightness = if let Some(b) = state.get("brightness").and_then(|v| v.as_f64()) {
            b.clamp(0.0, 100.0).round() as i64
        } else if let Some(level) = state.get("level").and_then(|v| v.as_f64()) {
            ((level * 100.0 / 255.0).round()) as i64
        } else {
            return None;
        };
        Some(DeviceState::from([("brightness".to_string(), json!(brightness))]))
    }

    fn map_command(
        &self,
        _device_key: &str,
        command: &GoogleCommand,
        _endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value> {
        match command {
            GoogleCommand::BrightnessAbsolute { brightness } => {
                let clamped = (*brightness).clamp(0, 100);
                let level = (clamped as f64 * 255.0 / 100.0).round() as i64;
                Some(json!({ "level": level }))
            }
            _ => None,
        }
    }
}
