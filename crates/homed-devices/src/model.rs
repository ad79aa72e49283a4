//! Core data model: gateway-side devices/endpoints/state and
//! their Google Smart Home projections.
//!
//! Struct-field style (plain `serde`-derived structs, `Option<T>` for
//! absent fields) matches `nexus-common::models::channel::Channel`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A logical device reported by a gateway.
/// `key` is unique within one gateway connection, not globally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomedDevice {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
    pub endpoints: Vec<HomedEndpoint>,
    #[serde(default)]
    pub available: Option<bool>,
}

/// A physical sub-function of a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HomedEndpoint {
    #[serde(default)]
    pub id: u32,
    pub exposes: Vec<String>,
    #[serde(default)]
    pub options: Option<EndpointOptions>,
}

/// Keyed configuration bag recognized on an endpoint. Only the keys the capability mapper and trait
/// handlers actually consult are modeled as typed fields; everything else
/// round-trips through `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EndpointOptions {
    #[serde(default)]
    pub switch: Option<String>,
    #[serde(default)]
    pub lock: Option<String>,
    #[serde(default)]
    pub light: Option<Vec<String>>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub invert_cover: Option<bool>,
    #[serde(default)]
    pub color_temperature: Option<serde_json::Value>,
    #[serde(default)]
    pub system_mode: Option<serde_json::Value>,
    #[serde(default)]
    pub operation_mode: Option<serde_json::Value>,
    #[serde(default)]
    pub target_temperature: Option<serde_json::Value>,
    #[serde(default)]
    pub running_status: Option<bool>,
    #[serde(default)]
    pub modes: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EndpointOptions {
    pub fn light_has(&self, item: &str) -> bool {
        self.light.as_ref().is_some_and(|items| items.iter().any(|i| i == item))
    }

    pub fn has_color_temperature(&self) -> bool {
        self.color_temperature.is_some()
    }

    /// Merge `other` into `self`, with `other`'s keys taking priority —
    /// used when merging later endpoints' options over earlier ones
    ///.
    pub fn merged_over(mut self, other: &EndpointOptions) -> EndpointOptions {
        macro_rules! override_if_some {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        override_if_some!(switch);
        override_if_some!(lock);
        override_if_some!(light);
        override_if_some!(cover);
        override_if_some!(invert_cover);
        override_if_some!(color_temperature);
        override_if_some!(system_mode);
        override_if_some!(operation_mode);
        override_if_some!(target_temperature);
        override_if_some!(running_status);
        override_if_some!(modes);
        for (k, v) in &other.extra {
            self.extra.insert(k.clone(), v.clone());
        }
        self
    }
}

/// Mapping from string to arbitrary JSON value, plus an optional nested
/// per-endpoint breakdown.
pub type DeviceState = HashMap<String, serde_json::Value>;

/// Read the `available` field, defaulting to online (`true`) when absent,
/// matching spec.md §4.E `mapToGoogleState`'s `online: state.available ??
/// true`.
pub fn is_available(state: &DeviceState) -> bool {
    state.get("available").and_then(|v| v.as_bool()).unwrap_or(true)
}

/// Read the nested per-endpoint state breakdown, if the gateway reported
/// one.
pub fn endpoint_state(state: &DeviceState, endpoint_id: u32) -> Option<DeviceState> {
    state
        .get("endpoints")
        .and_then(|v| v.as_object())
        .and_then(|endpoints| endpoints.get(&endpoint_id.to_string()))
        .and_then(|v| v.as_object())
        .map(|map| map.clone().into_iter().collect())
}

/// Google Smart Home device types this mapper can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoogleDeviceType {
    #[serde(rename = "action.devices.types.SENSOR")]
    Sensor,
    #[serde(rename = "action.devices.types.OUTLET")]
    Outlet,
    #[serde(rename = "action.devices.types.LIGHT")]
    Light,
    #[serde(rename = "action.devices.types.LOCK")]
    Lock,
    #[serde(rename = "action.devices.types.THERMOSTAT")]
    Thermostat,
    #[serde(rename = "action.devices.types.BLINDS")]
    Blinds,
    #[serde(rename = "action.devices.types.SWITCH")]
    Switch,
}

/// Google Smart Home traits this mapper can infer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoogleTrait {
    #[serde(rename = "action.devices.traits.OnOff")]
    OnOff,
    #[serde(rename = "action.devices.traits.Brightness")]
    Brightness,
    #[serde(rename = "action.devices.traits.ColorSetting")]
    ColorSetting,
    #[serde(rename = "action.devices.traits.OpenClose")]
    OpenClose,
    #[serde(rename = "action.devices.traits.TemperatureSetting")]
    TemperatureSetting,
    #[serde(rename = "action.devices.traits.SensorState")]
    SensorState,
}

/// The projection of a `HomedDevice` into Google's model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDevice {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: GoogleDeviceType,
    pub traits: Vec<GoogleTrait>,
    pub name: GoogleDeviceName,
    pub will_report_state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    pub device_info: GoogleDeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDeviceName {
    pub default_names: Vec<String>,
    pub name: String,
    pub nicknames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDeviceInfo {
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    pub sw_version: String,
}

/// Commands accepted from Google's EXECUTE intent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "command", content = "params")]
pub enum GoogleCommand {
    #[serde(rename = "action.devices.commands.OnOff")]
    OnOff { on: bool },
    #[serde(rename = "action.devices.commands.BrightnessAbsolute")]
    BrightnessAbsolute { brightness: i64 },
    #[serde(rename = "action.devices.commands.ColorAbsolute")]
    ColorAbsolute { color: GoogleColorParam },
    #[serde(rename = "action.devices.commands.OpenClose")]
    OpenClose {
        #[serde(default = "default_open_percent")]
        #[serde(rename = "openPercent")]
        open_percent: i64,
    },
    #[serde(rename = "action.devices.commands.ThermostatTemperatureSetpoint")]
    ThermostatTemperatureSetpoint {
        #[serde(rename = "thermostatTemperatureSetpoint")]
        thermostat_temperature_setpoint: f64,
    },
    #[serde(rename = "action.devices.commands.ThermostatSetMode")]
    ThermostatSetMode {
        #[serde(rename = "thermostatMode")]
        thermostat_mode: String,
    },
}

fn default_open_percent() -> i64 {
    100
}

/// The color parameter union accepted by `ColorAbsolute`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GoogleColorParam {
    SpectrumRgb { #[serde(rename = "spectrumRGB")] spectrum_rgb: i64 },
    SpectrumHsv { #[serde(rename = "spectrumHSV")] spectrum_hsv: HsvColor },
    TemperatureK { #[serde(rename = "temperatureK")] temperature_k: i64 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HsvColor {
    pub hue: f64,
    pub saturation: f64,
    pub value: f64,
}

/// A single EXECUTE command group as sent by Google: the device ids it
/// targets plus the commands to run against all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionGroup {
    pub devices: Vec<GoogleDeviceRef>,
    pub execution: Vec<GoogleCommand>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleDeviceRef {
    pub id: String,
}

/// A fully planned, gateway-bound command produced by
/// `mapExecutionRequest`.
#[derive(Debug, Clone)]
pub struct CommandToSend {
    pub user_id: String,
    pub client_id: String,
    pub device_key: String,
    pub endpoint_id: Option<u32>,
    pub google_device_ids: Vec<String>,
    pub message: serde_json::Value,
}

/// An execution request as received from Google, already parsed out of
/// the raw intent body.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub user_id: String,
    pub google_device_ids: Vec<String>,
    pub commands: Vec<GoogleCommand>,
}
