//! Trait handlers: a uniform interface over four operations,
//! registered in a fixed immutable table keyed by trait id.

mod brightness;
mod color;
mod onoff;
mod openclose;
mod sensor;
mod temperature;

use crate::model::{DeviceState, EndpointOptions, GoogleCommand, GoogleTrait};
use std::collections::HashSet;

pub(crate) use openclose::COVER_FAMILY_EXPOSES;
pub(crate) use sensor::SENSOR_EXPOSES;

/// A single Google Smart Home trait's logic: whether a device qualifies for
/// it, what attributes it contributes, how it reads state, and how it
/// translates commands.
pub trait TraitHandler: Send + Sync {
    fn trait_id(&self) -> GoogleTrait;

    /// Whether a device whose merged expose set is `exposes` (with merged
    /// `options`) supports this trait.
    fn supports(&self, exposes: &HashSet<String>, options: Option<&EndpointOptions>) -> bool;

    /// Static attributes this trait contributes to a GoogleDevice, or
    /// `None` if it has nothing to add.
    fn attributes(
        &self,
        exposes: &HashSet<String>,
        options: Option<&EndpointOptions>,
    ) -> Option<serde_json::Value>;

    /// The partial state fragment this trait reads out of a raw device
    /// state, or `None` if nothing applicable is present.
    fn state(&self, state: &DeviceState) -> Option<DeviceState>;

    /// Translate a Google command into the message this trait would send
    /// to the gateway, or `None` if this handler doesn't recognize it.
    fn map_command(
        &self,
        device_key: &str,
        command: &GoogleCommand,
        endpoint_id: Option<u32>,
    ) -> Option<serde_json::Value>;
}

/// The fixed, immutable table of all known trait handlers, in priority
/// order (used by `mapToHomedCommand`'s "first handler that recognizes the
/// command" rule).
pub fn handlers() -> &'static [&'static dyn TraitHandler] {
    static HANDLERS: &[&dyn TraitHandler] = &[
        &onoff::OnOffHandler,
        &brightness::BrightnessHandler,
        &color::ColorSettingHandler,
        &openclose::OpenCloseHandler,
        &temperature::TemperatureSettingHandler,
        &sensor::SensorStateHandler,
    ];
    HANDLERS
}

pub(crate) fn merge_fragment(into: &mut DeviceState, fragment: DeviceState) {
    for (k, v) in fragment {
        into.insert(k, v);
    }
}

pub(crate) fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s == "on" || s == "true" || s == "1",
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}
