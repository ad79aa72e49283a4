use super::{merge_fragment, TraitHandler};
use crate::model::{DeviceState, EndpointOptions, GoogleCommand, GoogleTrait};
use serde_json::json;
use std::collections::HashSet;

const VALID_MODES: [&str; 7] = ["off", "heat", "cool", "auto", "drying", "eco", "heatCool"];
const DEFAULT_MODES: [&str; 3] = ["heat", "cool", "off"];

pub struct TemperatureSettingHandler;

impl TraitHandler for TemperatureSettingHandler {
    fn trait_id(&self) -> GoogleTrait {
        GoogleTrait::TemperatureSetting
    }

    fn supports(&self, exposes: &HashSet<String>, _options: Option<&EndpointOptions>) -> bool {
        exposes.contains("thermostat") || exposes.contains("temperature_controller")
    }

    fn attributes(
        &self,
        _exposes: &HashSet<String>,
        options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value> {
        let controllable = options.is_some_and(|o| {
            o.target_temperature.is_some()
                || o.system_mode.is_some()
                || o.operation_mode.is_some()
                || o.modes.is_some()
        });

        if !controllable {
            return Some(json!({
                "availableThermostatModes": ["off"],
                "thermostatTemperatureUnit": "CELSIUS",
                "queryOnlyTemperatureSetting": true,
            }));
        }

        let modes: Vec<&str> = options
            .and_then(|o| o.modes.as_ref())
            .map(|m| m.iter().filter(|mode| VALID_MODES.contains(&mode.as_str())).map(|s| s.as_str()).collect())
            .filter(|v: &Vec<&str>| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODES.to_vec());

        Some(json!({
            "availableThermostatModes": modes,
            "thermostatTemperatureUnit": "CELSIUS",
        }))
    }

    fn state(&self, state: &DeviceState) -> Option<DeviceState> {
        let mut fragment = DeviceState::new();

        if let Some(t) = state.get("temperature").and_then(|v| v.as_f64()) {
            fragment.insert("thermostatTemperatureAmbient".to_string(), json!(t));
        }
        if let Some(h) = state.get("humidity").and_then(|v| v.as_f64()) {
            fragment.insert("thermostatHumidityAmbient".to_string(), json!(h));
        }
        if let Some(setpoint) = state.get("setpoint").and_then(|v| v.as_f64()) {
            fragment.insert("thermostatTemperatureSetpoint".to_string(), json!(setpoint));
        }
        if let Some(mode) = state.get("mode").and_then(|v| v.as_str()) {
            if VALID_MODES.contains(&mode) {
                fragment.insert("thermostatMode".to_string(), json!(mode));
            }
        }

        if fragment.is_empty() {
            None
        } else {
            let mut out = DeviceState::new();
            merge_fragment(&mut out, fragment);
            Some(out)
        }
    }

    fn map_command(
        &self,
        _device_key: &str,
        command: &GoogleCommand,
        _endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value> {
        match command {
            GoogleCommand::ThermostatTemperatureSetpoint { thermostat_temperature_setpoint } => {
                Some(json!({ "setpoint": thermostat_temperature_setpoint }))
            }
            GoogleCommand::ThermostatSetMode { thermostat_mode } => {
                Some(json!({ "mode": thermostat_mode }))
            }
            _ => None,
        }
    }
}
