//! Home-automation auto-discovery descriptors.
//!
//! Built once from the action table at bridge start and republished verbatim
//! (retained) on every connection. Topics are stable per device and action,
//! so republishing overwrites rather than duplicates.

use core::fmt::Write;

use heapless::{String, Vec};
use serde::Serialize;

use crate::action::ActionMap;
use crate::config::{
    DEVICE_ID_PREFIX, DEVICE_MANUFACTURER, DEVICE_MODEL, DISCOVERY_PREFIX, FIRMWARE_VERSION,
};
use crate::error::Error;

pub type DeviceId = String<32>;
pub type Topic = String<128>;
pub type Payload = String<512>;

/// Maximum number of discovery entries (triggers + sensors).
pub const MAX_DISCOVERY: usize = 16;

/// Stable device identifier derived from the chip's unique id.
pub fn device_id(chip_id: u64) -> DeviceId {
    let mut id = DeviceId::new();
    // Prefix and six hex digits always fit.
    let _ = write!(id, "{}{:06x}", DEVICE_ID_PREFIX, chip_id & 0x00FF_FFFF);
    id
}

/// Topic on which presses of `action_id` are published.
pub fn trigger_topic(device_id: &str, action_id: &str) -> Result<Topic, Error> {
    let mut t = Topic::new();
    write!(t, "{}/action/{}", device_id, action_id).map_err(|_| Error::BufferOverflow)?;
    Ok(t)
}

/// Topic carrying the battery state document.
pub fn battery_topic(device_id: &str) -> Result<Topic, Error> {
    let mut t = Topic::new();
    write!(t, "{}/battery", device_id).map_err(|_| Error::BufferOverflow)?;
    Ok(t)
}

#[derive(Serialize)]
struct BatteryState {
    percent: u8,
    /// Volts, two decimals.
    voltage: f32,
}

/// `{"percent":P,"voltage":V}`, volts rounded down to two decimals.
pub fn battery_payload(percent: u8, millivolts: u16) -> Result<String<48>, Error> {
    let state = BatteryState {
        percent: percent.min(100),
        voltage: f32::from(millivolts / 10) / 100.0,
    };
    serde_json_core::to_string(&state).map_err(|_| Error::BufferOverflow)
}

#[derive(Serialize)]
struct DeviceBlock<'a> {
    identifiers: &'a [&'a str],
    name: &'a str,
    manufacturer: &'a str,
    model: &'a str,
    sw_version: &'a str,
}

impl<'a> DeviceBlock<'a> {
    fn new(device_id: &'a [&'a str], name: &'a str) -> Self {
        Self {
            identifiers: device_id,
            name,
            manufacturer: DEVICE_MANUFACTURER,
            model: DEVICE_MODEL,
            sw_version: FIRMWARE_VERSION,
        }
    }
}

/// Device-automation trigger config.
#[derive(Serialize)]
struct TriggerConfig<'a> {
    automation_type: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    subtype: &'a str,
    topic: &'a str,
    payload: &'a str,
    unique_id: &'a str,
    device: DeviceBlock<'a>,
}

#[derive(Serialize)]
struct SensorConfig<'a> {
    name: &'a str,
    device_class: &'a str,
    unit_of_measurement: &'a str,
    state_topic: &'a str,
    value_template: &'a str,
    unique_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<&'a str>,
    device: DeviceBlock<'a>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryEntry {
    pub topic: Topic,
    pub payload: Payload,
}

/// Full set of retained discovery messages for one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoverySet {
    entries: Vec<DiscoveryEntry, MAX_DISCOVERY>,
}

impl DiscoverySet {
    pub fn build(device_id: &str, device_name: &str, actions: &ActionMap) -> Result<Self, Error> {
        let mut entries = Vec::new();
        for action_id in actions.trigger_ids() {
            let entry = trigger_entry(device_id, device_name, action_id)?;
            entries.push(entry).map_err(|_| Error::BufferOverflow)?;
        }
        for sensor in [Sensor::Battery, Sensor::Voltage] {
            let entry = sensor_entry(device_id, device_name, sensor)?;
            entries.push(entry).map_err(|_| Error::BufferOverflow)?;
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DiscoveryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn trigger_entry(
    device_id: &str,
    device_name: &str,
    action_id: &str,
) -> Result<DiscoveryEntry, Error> {
    let mut topic = Topic::new();
    write!(
        topic,
        "{}/device_automation/{}/{}/config",
        DISCOVERY_PREFIX, device_id, action_id
    )
    .map_err(|_| Error::BufferOverflow)?;

    let state_topic = trigger_topic(device_id, action_id)?;
    let unique_id = unique_id(device_id, action_id)?;
    let ids = [device_id];
    let config = TriggerConfig {
        automation_type: "trigger",
        kind: "button_short_press",
        subtype: action_id,
        topic: &state_topic,
        payload: action_id,
        unique_id: &unique_id,
        device: DeviceBlock::new(&ids, device_name),
    };
    let payload = serde_json_core::to_string(&config).map_err(|_| Error::BufferOverflow)?;

    Ok(DiscoveryEntry { topic, payload })
}

fn unique_id(device_id: &str, suffix: &str) -> Result<String<64>, Error> {
    let mut id = String::new();
    write!(id, "{}_{}", device_id, suffix).map_err(|_| Error::BufferOverflow)?;
    Ok(id)
}

#[derive(Clone, Copy)]
enum Sensor {
    Battery,
    Voltage,
}

fn sensor_entry(
    device_id: &str,
    device_name: &str,
    sensor: Sensor,
) -> Result<DiscoveryEntry, Error> {
    let (key, name, class, unit, template, category) = match sensor {
        Sensor::Battery => (
            "battery",
            "Battery",
            "battery",
            "%",
            "{{ value_json.percent }}",
            None,
        ),
        Sensor::Voltage => (
            "voltage",
            "Battery Voltage",
            "voltage",
            "V",
            "{{ value_json.voltage }}",
            Some("diagnostic"),
        ),
    };

    let mut topic = Topic::new();
    write!(
        topic,
        "{}/sensor/{}/{}/config",
        DISCOVERY_PREFIX, device_id, key
    )
    .map_err(|_| Error::BufferOverflow)?;

    let state_topic = battery_topic(device_id)?;
    let unique_id = unique_id(device_id, key)?;
    let ids = [device_id];
    let config = SensorConfig {
        name,
        device_class: class,
        unit_of_measurement: unit,
        state_topic: &state_topic,
        value_template: template,
        unique_id: &unique_id,
        entity_category: category,
        device: DeviceBlock::new(&ids, device_name),
    };
    let payload = serde_json_core::to_string(&config).map_err(|_| Error::BufferOverflow)?;

    Ok(DiscoveryEntry { topic, payload })
}
