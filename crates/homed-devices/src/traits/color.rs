use super::TraitHandler;
use crate::model::{DeviceState, EndpointOptions, GoogleColorParam, GoogleCommand, GoogleTrait};
use serde_json::{json, Value};
use std::collections::HashSet;

pub struct ColorSettingHandler;

impl TraitHandler for ColorSettingHandler {
    fn trait_id(&self) -> GoogleTrait {
        GoogleTrait::ColorSetting
    }

    fn supports(&self, exposes: &HashSet<String>, options: Option<&EndpointOptions>) -> bool {
        if exposes.contains("color_light") || exposes.contains("color") {
            return true;
        }
        exposes.contains("light")
            && options.is_some_and(|o| o.light_has("color") || o.light_has("colorTemperature"))
    }

    fn attributes(
        &self,
        exposes: &HashSet<String>,
        options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value> {
        let promote_to_hsv =
            exposes.contains("color_temperature") || options.is_some_and(|o| o.has_color_temperature());
        let color_model = if promote_to_hsv { "hsv" } else { "rgb" };
        Some(json!({ "colorModel": color_model }))
    }

    fn state(&self, state: &DeviceState) -> Option<DeviceState> {
        if let Some(color) = state.get("color") {
            match color {
                Value::Object(map) if map.contains_key("r") || map.contains_key("x") => {
                    return Some(DeviceState::from([("color".to_string(), color.clone())]));
                }
                Value::String(s) if s.starts_with('#') && s.len() == 7 => {
                    if let Some(rgb) = parse_hex_rgb(s) {
                        return Some(DeviceState::from([(
                            "color".to_string(),
                            json!({ "spectrumRgb": rgb }),
                        )]));
                    }
                }
                _ => {}
            }
        }
        if let Some(temperature_k) = state.get("colorTemperature").and_then(|v| v.as_i64()) {
            return Some(DeviceState::from([(
                "color".to_string(),
                json!({ "temperatureK": temperature_k }),
            )]));
        }
        None
    }

    fn map_command(
        &self,
        _device_key: &str,
        command: &GoogleCommand,
        _endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value> {
        match command {
            GoogleCommand::ColorAbsolute { color } => match color {
                GoogleColorParam::SpectrumRgb { spectrum_rgb } => {
                    let n = *spectrum_rgb;
                    let r = (n >> 16) & 0xff;
                    let g = (n >> 8) & 0xff;
                    let b = n & 0xff;
                    Some(json!({ "color": { "r": r, "g": g, "b": b } }))
                }
                GoogleColorParam::SpectrumHsv { spectrum_hsv } => Some(json!({
                    "color": {
                        "hue": spectrum_hsv.hue,
                        "saturation": spectrum_hsv.saturation,
                        "value": spectrum_hsv.value,
                    }
                })),
                GoogleColorParam::TemperatureK { temperature_k } => {
                    Some(json!({ "colorTemperature": temperature_k }))
                }
            },
            _ => None,
        }
    }
}

fn parse_hex_rgb(hex: &str) -> Option<i64> {
    let digits = hex.strip_prefix('#')?;
    i64::from_str_radix(digits, 16).ok()
}
