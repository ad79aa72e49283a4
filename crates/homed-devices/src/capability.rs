//! The capability mapper: pure, stateless translation
//! between `HomedDevice`/`DeviceState` and Google Smart Home's device and
//! state model. Consumed by the fulfillment router; has no knowledge of
//! connections, repositories, or HTTP.

use crate::model::{
    CommandToSend, DeviceState, EndpointOptions, ExecutionRequest, GoogleDevice, GoogleDeviceInfo,
    GoogleDeviceName, GoogleDeviceType, GoogleTrait, HomedDevice, HomedEndpoint,
};
use crate::traits::handlers;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Exposes that grant an endpoint "control capability" for the splitting
/// decision.
const CONTROL_VOCABULARY: [&str; 16] = [
    "switch",
    "relay",
    "outlet",
    "light",
    "dimmable_light",
    "color_light",
    "brightness",
    "color",
    "cover",
    "blinds",
    "curtain",
    "shutter",
    "lock",
    "door_lock",
    "thermostat",
    "temperature_controller",
];

/// The ordered primary-expose list used to decide whether a device's
/// control endpoints are "the same kind".
const PRIMARY_EXPOSE_ORDER: [&str; 14] = [
    "color_light",
    "dimmable_light",
    "light",
    "outlet",
    "relay",
    "switch",
    "blinds",
    "curtain",
    "shutter",
    "cover",
    "door_lock",
    "lock",
    "thermostat",
    "temperature_controller",
];

const GENERIC_SENSOR_EXPOSES: [&str; 13] = crate::traits::SENSOR_EXPOSES;
const COVER_FAMILY_EXPOSES: [&str; 4] = crate::traits::COVER_FAMILY_EXPOSES;

fn has_control_capability(exposes: &[String]) -> bool {
    exposes.iter().any(|e| CONTROL_VOCABULARY.contains(&e.as_str()))
}

fn primary_expose(exposes: &[String]) -> Option<&'static str> {
    PRIMARY_EXPOSE_ORDER.iter().find(|p| exposes.iter().any(|e| e == *p)).copied()
}

fn control_endpoints(device: &HomedDevice) -> Vec<&HomedEndpoint> {
    device.endpoints.iter().filter(|e| has_control_capability(&e.exposes)).collect()
}

/// Whether `device` should be split into one GoogleDevice per control
/// endpoint.
pub fn should_split(device: &HomedDevice) -> bool {
    let control = control_endpoints(device);
    if control.len() < 2 {
        return false;
    }
    let primaries: Vec<&str> = control.iter().filter_map(|e| primary_expose(&e.exposes)).collect();
    if primaries.len() < 2 {
        return false;
    }
    primaries.windows(2).all(|w| w[0] == w[1])
}

fn exposes_set(exposes: &[String]) -> HashSet<String> {
    exposes.iter().cloned().collect()
}

fn merged_exposes(device: &HomedDevice) -> HashSet<String> {
    device.endpoints.iter().flat_map(|e| e.exposes.iter().cloned()).collect()
}

fn merged_options(device: &HomedDevice) -> Option<EndpointOptions> {
    device.endpoints.iter().filter_map(|e| e.options.clone()).reduce(|acc, opts| acc.merged_over(&opts))
}

/// `toGoogleDeviceId`.
pub fn to_google_device_id(client_id: &str, device_key: &str, endpoint_id: Option<u32>) -> String {
    match endpoint_id {
        Some(id) => format!("{client_id}/{device_key}#{id}"),
        None => format!("{client_id}/{device_key}"),
    }
}

/// `fromGoogleDeviceId`, the inverse of [`to_google_device_id`].
pub fn from_google_device_id(id: &str) -> Option<(String, String, Option<u32>)> {
    let (client_id, rest) = id.split_once('/')?;
    let (device_key, endpoint_id) = match rest.split_once('#') {
        Some((key, eid)) => (key, Some(eid.parse::<u32>().ok()?)),
        None => (rest, None),
    };
    Some((client_id.to_string(), device_key.to_string(), endpoint_id))
}

/// `detectDeviceType`.
pub fn detect_device_type(exposes: &HashSet<String>) -> GoogleDeviceType {
    if exposes.contains("smoke") {
        return GoogleDeviceType::Sensor;
    }
    if GENERIC_SENSOR_EXPOSES.iter().any(|e| exposes.contains(*e)) {
        return GoogleDeviceType::Sensor;
    }
    if exposes.contains("outlet") {
        return GoogleDeviceType::Outlet;
    }
    if exposes.contains("light") || exposes.contains("color_light") || exposes.contains("dimmable_light") {
        return GoogleDeviceType::Light;
    }
    if exposes.contains("lock") || exposes.contains("door_lock") {
        return GoogleDeviceType::Lock;
    }
    if exposes.contains("thermostat") || exposes.contains("temperature_controller") {
        return GoogleDeviceType::Thermostat;
    }
    if COVER_FAMILY_EXPOSES.iter().any(|e| exposes.contains(*e)) {
        return GoogleDeviceType::Blinds;
    }
    if exposes.contains("switch") || exposes.contains("relay") {
        return GoogleDeviceType::Switch;
    }
    GoogleDeviceType::Sensor
}

/// `inferTraits`: the fixed handler table
/// already encodes each contribution rule in its `supports` check, in a
/// deterministic order, so no further dedup is needed.
pub fn infer_traits(exposes: &HashSet<String>, options: Option<&EndpointOptions>) -> Vec<GoogleTrait> {
    handlers().iter().filter(|h| h.supports(exposes, options)).map(|h| h.trait_id()).collect()
}

fn build_google_device(
    device: &HomedDevice,
    client_id: &str,
    exposes: &HashSet<String>,
    options: Option<&EndpointOptions>,
    endpoint_id: Option<u32>,
) -> GoogleDevice {
    let device_type = detect_device_type(exposes);
    let traits = infer_traits(exposes, options);

    let mut attributes_map = serde_json::Map::new();
    for t in &traits {
        if let Some(handler) = handlers().iter().find(|h| h.trait_id() == *t) {
            if let Some(Value::Object(map)) = handler.attributes(exposes, options) {
                attributes_map.extend(map);
            }
        }
    }
    let attributes = if attributes_map.is_empty() { None } else { Some(Value::Object(attributes_map)) };

    let suffix = endpoint_id.map(|id| format!(" - Switch {id}")).unwrap_or_default();
    let default_name = format!("{}{}", device.name, suffix);

    let mut nicknames = Vec::new();
    if let Some(description) = device.description.as_ref().filter(|d| !d.is_empty()) {
        nicknames.push(description.clone());
    }
    let manufacturer_model: Vec<String> =
        [device.manufacturer.clone(), device.model.clone()].into_iter().flatten().collect();
    if !manufacturer_model.is_empty() {
        nicknames.push(manufacturer_model.join(" "));
    }

    GoogleDevice {
        id: to_google_device_id(client_id, &device.key, endpoint_id),
        device_type,
        traits,
        name: GoogleDeviceName {
            default_names: vec![default_name.clone()],
            name: default_name,
            nicknames,
        },
        will_report_state: true,
        attributes,
        device_info: GoogleDeviceInfo {
            manufacturer: device.manufacturer.clone().unwrap_or_else(|| "Unknown Manufacturer".to_string()),
            model: device.model.clone().unwrap_or_else(|| "Unknown Model".to_string()),
            hw_version: None,
            sw_version: device.firmware.clone().unwrap_or_else(|| "unknown".to_string()),
        },
        custom_data: None,
    }
}

/// `mapToGoogleDevices`.
pub fn map_to_google_devices(device: &HomedDevice, client_id: &str) -> Vec<GoogleDevice> {
    if device.endpoints.is_empty() {
        return Vec::new();
    }
    if should_split(device) {
        control_endpoints(device)
            .into_iter()
            .map(|ep| {
                build_google_device(device, client_id, &exposes_set(&ep.exposes), ep.options.as_ref(), Some(ep.id))
            })
            .collect()
    } else {
        let exposes = merged_exposes(device);
        let options = merged_options(device);
        vec![build_google_device(device, client_id, &exposes, options.as_ref(), None)]
    }
}

fn state_fragment_for(state: &DeviceState, exposes: &HashSet<String>, options: Option<&EndpointOptions>) -> DeviceState {
    let mut out = DeviceState::new();
    out.insert("online".to_string(), json!(crate::model::is_available(state)));
    for t in infer_traits(exposes, options) {
        if let Some(handler) = handlers().iter().find(|h| h.trait_id() == t) {
            if let Some(fragment) = handler.state(state) {
                crate::traits::merge_fragment(&mut out, fragment);
            }
        }
    }
    out
}

/// `mapToGoogleState`, for the common
/// (non-split) case used directly by the testable properties in spec.md
/// §8.
pub fn map_to_google_state(device: &HomedDevice, state: &DeviceState) -> DeviceState {
    let exposes = merged_exposes(device);
    let options = merged_options(device);
    state_fragment_for(state, &exposes, options.as_ref())
}

/// `mapToGoogleStates`.
pub fn map_to_google_states(device: &HomedDevice, client_id: &str, state: &DeviceState) -> HashMap<String, DeviceState> {
    let mut out = HashMap::new();
    if device.endpoints.is_empty() {
        return out;
    }
    if should_split(device) {
        for ep in control_endpoints(device) {
            let exposes = exposes_set(&ep.exposes);
            let ep_state = crate::model::endpoint_state(state, ep.id).unwrap_or_else(|| state.clone());
            let id = to_google_device_id(client_id, &device.key, Some(ep.id));
            out.insert(id, state_fragment_for(&ep_state, &exposes, ep.options.as_ref()));
        }
    } else {
        let exposes = merged_exposes(device);
        let options = merged_options(device);
        let id = to_google_device_id(client_id, &device.key, None);
        out.insert(id, state_fragment_for(state, &exposes, options.as_ref()));
    }
    out
}

fn deep_eq(a: &DeviceState, b: &DeviceState) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| v == bv))
}

/// `getStateUpdates`.
pub fn get_state_updates(
    device: &HomedDevice,
    client_id: &str,
    prev: &DeviceState,
    next: &DeviceState,
) -> Option<HashMap<String, DeviceState>> {
    if device.endpoints.iter().all(|e| e.exposes.is_empty()) {
        return None;
    }
    let prev_states = map_to_google_states(device, client_id, prev);
    let next_states = map_to_google_states(device, client_id, next);

    let mut changed = HashMap::new();
    for (id, next_state) in &next_states {
        let differs = prev_states.get(id).map(|p| !deep_eq(p, next_state)).unwrap_or(true);
        if differs {
            changed.insert(id.clone(), next_state.clone());
        }
    }
    if changed.is_empty() { None } else { Some(changed) }
}

fn endpoint_id_for_single(device: &HomedDevice) -> Option<u32> {
    match device.endpoints.as_slice() {
        [only] if only.id > 0 => Some(only.id),
        _ => None,
    }
}

/// `mapToHomedCommand`.
pub fn map_to_homed_command(device: &HomedDevice, command: &crate::model::GoogleCommand) -> Option<Value> {
    let exposes = merged_exposes(device);
    let options = merged_options(device);
    let endpoint_id = endpoint_id_for_single(device);
    for t in infer_traits(&exposes, options.as_ref()) {
        if let Some(handler) = handlers().iter().find(|h| h.trait_id() == t) {
            if let Some(message) = handler.map_command(&device.key, command, endpoint_id) {
                return Some(message);
            }
        }
    }
    None
}

fn filter_to_endpoint(device: &HomedDevice, endpoint_id: Option<u32>) -> HomedDevice {
    match endpoint_id {
        Some(id) => {
            let mut filtered = device.clone();
            filtered.endpoints.retain(|e| e.id == id);
            filtered
        }
        None => device.clone(),
    }
}

/// `mapExecutionRequest`.
pub fn map_execution_request(
    request: &ExecutionRequest,
    all_devices: &[(HomedDevice, String)],
) -> Vec<CommandToSend> {
    let mut out = Vec::new();
    for (device, client_id) in all_devices {
        let own_ids: Vec<String> =
            map_to_google_devices(device, client_id).into_iter().map(|gd| gd.id).collect();
        let matched: Vec<&String> = own_ids.iter().filter(|id| request.google_device_ids.contains(id)).collect();
        if matched.is_empty() {
            continue;
        }
        for matched_id in matched {
            let Some((_, _, endpoint_id)) = from_google_device_id(matched_id) else {
                continue;
            };
            let filtered = filter_to_endpoint(device, endpoint_id);
            for command in &request.commands {
                if let Some(message) = map_to_homed_command(&filtered, command) {
                    out.push(CommandToSend {
                        user_id: request.user_id.clone(),
                        client_id: client_id.clone(),
                        device_key: device.key.clone(),
                        endpoint_id,
                        google_device_ids: vec![matched_id.clone()],
                        message,
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GoogleCommand, HomedEndpoint};

    fn endpoint(id: u32, exposes: &[&str]) -> HomedEndpoint {
        HomedEndpoint { id, exposes: exposes.iter().map(|s| s.to_string()).collect(), options: None }
    }

    #[test]
    fn device_id_round_trips_with_and_without_endpoint() {
        assert_eq!(to_google_device_id("c-1", "dev1", None), "c-1/dev1");
        assert_eq!(from_google_device_id("c-1/dev1"), Some(("c-1".into(), "dev1".into(), None)));

        assert_eq!(to_google_device_id("c-1", "dev1", Some(2)), "c-1/dev1#2");
        assert_eq!(from_google_device_id("c-1/dev1#2"), Some(("c-1".into(), "dev1".into(), Some(2))));
    }

    #[test]
    fn splits_two_switch_endpoints_into_two_devices() {
        let device = HomedDevice {
            key: "dev1".into(),
            name: "Dev1".into(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![endpoint(1, &["switch"]), endpoint(2, &["switch"])],
            available: None,
        };
        let devices = map_to_google_devices(&device, "c-1");
        assert_eq!(devices.len(), 2);
        let ids: HashSet<_> = devices.iter().map(|d| d.id.clone()).collect();
        assert!(ids.contains("c-1/dev1#1"));
        assert!(ids.contains("c-1/dev1#2"));
        for d in &devices {
            assert_eq!(d.device_type, GoogleDeviceType::Switch);
            assert_eq!(d.traits, vec![GoogleTrait::OnOff]);
        }
    }

    #[test]
    fn does_not_split_single_control_endpoint() {
        let device = HomedDevice {
            key: "dev2".into(),
            name: "Dev2".into(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![endpoint(1, &["switch"])],
            available: None,
        };
        let devices = map_to_google_devices(&device, "c-1");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "c-1/dev2");
    }

    #[test]
    fn does_not_split_mismatched_primaries() {
        let device = HomedDevice {
            key: "dev3".into(),
            name: "Dev3".into(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![endpoint(1, &["switch"]), endpoint(2, &["thermostat"])],
            available: None,
        };
        assert!(!should_split(&device));
        assert_eq!(map_to_google_devices(&device, "c-1").len(), 1);
    }

    #[test]
    fn state_updates_are_none_when_unchanged() {
        let device = HomedDevice {
            key: "dev4".into(),
            name: "Dev4".into(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![endpoint(0, &["switch"])],
            available: None,
        };
        let state = DeviceState::from([("on".to_string(), json!(true))]);
        assert!(get_state_updates(&device, "c-1", &state, &state).is_none());
    }

    #[test]
    fn online_defaults_true_when_available_absent() {
        let device = HomedDevice {
            key: "dev5".into(),
            name: "Dev5".into(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![endpoint(0, &["switch"])],
            available: None,
        };
        let state = DeviceState::new();
        let mapped = map_to_google_state(&device, &state);
        assert_eq!(mapped.get("online"), Some(&json!(true)));
    }

    #[test]
    fn execution_request_never_targets_a_foreign_device() {
        let device = HomedDevice {
            key: "dev6".into(),
            name: "Dev6".into(),
            description: None,
            manufacturer: None,
            model: None,
            version: None,
            firmware: None,
            endpoints: vec![endpoint(0, &["switch"])],
            available: None,
        };
        let all_devices = vec![(device, "c-1".to_string())];
        let request = ExecutionRequest {
            user_id: "u-1".into(),
            google_device_ids: vec!["c-1/dev6".into(), "c-9/ghost".into()],
            commands: vec![GoogleCommand::OnOff { on: true }],
        };
        let plan = map_execution_request(&request, &all_devices);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].device_key, "dev6");
        assert_eq!(plan[0].client_id, "c-1");
    }
}
