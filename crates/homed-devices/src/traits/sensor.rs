use super::TraitHandler;
use crate::model::{DeviceState, EndpointOptions, GoogleCommand, GoogleTrait};
use serde_json::json;
use std::collections::HashSet;

struct NumericSensor {
    expose: &'static str,
    name: &'static str,
    unit: &'static str,
}

const NUMERIC_SENSORS: &[NumericSensor] = &[
    NumericSensor { expose: "temperature", name: "Temperature", unit: "°C" },
    NumericSensor { expose: "humidity", name: "Humidity", unit: "%" },
    NumericSensor { expose: "pressure", name: "AirPressure", unit: "Pa" },
    NumericSensor { expose: "co2", name: "CarbonDioxideLevel", unit: "ppm" },
    NumericSensor { expose: "co", name: "CarbonMonoxideLevel", unit: "ppm" },
    NumericSensor { expose: "no2", name: "NitrogenDioxideLevel", unit: "ppm" },
    NumericSensor { expose: "pm10", name: "PM10", unit: "µg/m³" },
    NumericSensor { expose: "pm25", name: "PM2.5", unit: "µg/m³" },
];

pub const SENSOR_EXPOSES: [&str; 13] = [
    "temperature",
    "humidity",
    "pressure",
    "co2",
    "pm10",
    "pm25",
    "co",
    "no2",
    "contact",
    "occupancy",
    "motion",
    "water_leak",
    "gas",
];

pub struct SensorStateHandler;

impl TraitHandler for SensorStateHandler {
    fn trait_id(&self) -> GoogleTrait {
        GoogleTrait::SensorState
    }

    fn supports(&self, exposes: &HashSet<String>, _options: Option<&EndpointOptions>) -> bool {
        SENSOR_EXPOSES.iter().any(|e| exposes.contains(*e)) || exposes.contains("smoke")
    }

    fn attributes(
        &self,
        exposes: &HashSet<String>,
        _options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value> {
        let mut supported = Vec::new();
        for sensor in NUMERIC_SENSORS {
            if exposes.contains(sensor.expose) {
                supported.push(json!({
                    "name": sensor.name,
                    "numericCapabilities": { "rawValueUnit": sensor.unit },
                }));
            }
        }
        for (expose, name) in [
            ("occupancy", "Occupancy"),
            ("motion", "Occupancy"),
            ("contact", "Openclose"),
            ("smoke", "Smoke"),
            ("water_leak", "Waterleak"),
            ("gas", "Gas"),
        ] {
            if exposes.contains(expose) {
                supported.push(json!({ "name": name }));
            }
        }
        if supported.is_empty() {
            None
        } else {
            Some(json!({ "sensorStatesSupported": supported }))
        }
    }

    fn state(&self, state: &DeviceState) -> Option<DeviceState> {
        let mut fragment = DeviceState::new();
        let mut numeric_data = Vec::new();

        for sensor in NUMERIC_SENSORS {
            if let Some(value) = state.get(sensor.expose).and_then(|v| v.as_f64()) {
                if value.is_finite() {
                    numeric_data.push(json!({ "name": sensor.name, "rawValue": value }));
                }
            }
        }
        if !numeric_data.is_empty() {
            fragment.insert("currentSensorStateData".to_string(), json!(numeric_data));
        }

        if let Some(occupied) = state
            .get("occupancy")
            .or_else(|| state.get("motion"))
            .and_then(|v| v.as_bool())
        {
            fragment.insert(
                "occupancy".to_string(),
                json!(if occupied { "OCCUPIED" } else { "UNOCCUPIED" }),
            );
        }
        if let Some(contact) = state.get("contact").and_then(|v| v.as_bool()) {
            fragment.insert("openclose".to_string(), json!(if contact { "CLOSED" } else { "OPEN" }));
        }
        if let Some(smoke) = state.get("smoke").and_then(|v| v.as_bool()) {
            fragment.insert("smoke".to_string(), json!(if smoke { "SMOKE" } else { "NO_SMOKE" }));
        }
        if let Some(leak) = state.get("water_leak").and_then(|v| v.as_bool()) {
            fragment.insert("waterleak".to_string(), json!(if leak { "LEAK" } else { "NO_LEAK" }));
        }
        if let Some(gas) = state.get("gas").and_then(|v| v.as_bool()) {
            fragment.insert("gas".to_string(), json!(if gas { "HIGH" } else { "NORMAL" }));
        }

        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    }

    fn map_command(
        &self,
        _device_key: &str,
        _command: &GoogleCommand,
        _endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value> {
        None
    }
}
