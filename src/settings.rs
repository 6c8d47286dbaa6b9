//! Runtime configuration: WiFi credentials, broker address and the
//! power-button mode.
//!
//! Written by the setup portal (on the network co-processor), persisted in
//! its own record region and read at boot.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::config::{CONFIG_FLASH_PAGE_START, FLASH_PAGE_SIZE};
use crate::error::Error;
use crate::storage::{LoadOutcome, Persisted};
use embedded_storage_async::nor_flash::NorFlash;

/// Bumped whenever the serialised layout of [`Config`] changes.
const CONFIG_FORMAT_VERSION: u8 = 1;

pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// What the power button does. The portal form defaults to the trigger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerButtonMode {
    /// Send the HID consumer Power usage to the paired host.
    BleKey,
    /// Publish the `power` trigger to the broker.
    #[default]
    HaTrigger,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub wifi_ssid: String<32>,
    pub wifi_password: String<64>,
    pub broker_host: String<64>,
    pub broker_port: u16,
    pub broker_user: String<32>,
    pub broker_password: String<64>,
    pub device_name: String<32>,
    pub power_button_mode: PowerButtonMode,
    pub configured: bool,
}

impl Config {
    /// Enough to bring up the bridge.
    pub fn is_configured(&self) -> bool {
        self.configured && !self.wifi_ssid.is_empty() && !self.broker_host.is_empty()
    }

    pub fn broker_port(&self) -> u16 {
        if self.broker_port == 0 {
            DEFAULT_BROKER_PORT
        } else {
            self.broker_port
        }
    }

    pub fn device_name(&self) -> &str {
        if self.device_name.is_empty() {
            crate::config::BLE_DEVICE_NAME
        } else {
            &self.device_name
        }
    }

    /// Apply one `key=value` field as sent by the setup portal. The short
    /// names written by older portal builds are accepted too.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), Error> {
        fn put<const N: usize>(dst: &mut String<N>, v: &str) -> Result<(), Error> {
            dst.clear();
            dst.push_str(v).map_err(|_| Error::BufferOverflow)
        }

        match key {
            "wifi_ssid" | "ssid" => put(&mut self.wifi_ssid, value),
            "wifi_password" => put(&mut self.wifi_password, value),
            "mqtt_host" => put(&mut self.broker_host, value),
            "mqtt_port" => {
                self.broker_port = value.parse().map_err(|_| Error::Encoding)?;
                Ok(())
            }
            "mqtt_user" => put(&mut self.broker_user, value),
            "mqtt_password" => put(&mut self.broker_password, value),
            "device_name" => put(&mut self.device_name, value),
            "power_button_mode" | "power_mode" => {
                self.power_button_mode = match value {
                    "ble" => PowerButtonMode::BleKey,
                    "ha" => PowerButtonMode::HaTrigger,
                    _ => return Err(Error::Encoding),
                };
                Ok(())
            }
            "configured" => {
                self.configured = value == "1" || value == "true";
                Ok(())
            }
            _ => Err(Error::Encoding),
        }
    }
}

/// Cached, persisted [`Config`].
pub struct ConfigStore {
    cell: Persisted<Config>,
}

impl ConfigStore {
    pub const fn new() -> Self {
        Self::at(CONFIG_FLASH_PAGE_START * FLASH_PAGE_SIZE)
    }

    pub const fn at(base: u32) -> Self {
        Self {
            cell: Persisted::new(base, CONFIG_FORMAT_VERSION),
        }
    }

    pub fn get(&self) -> Option<&Config> {
        self.cell.get()
    }

    /// Stored config, if it is complete.
    pub fn usable(&self) -> Option<&Config> {
        self.cell.get().filter(|c| c.is_configured())
    }

    pub fn is_configured(&self) -> bool {
        self.usable().is_some()
    }

    /// Without a usable broker config the power button stays a BLE key.
    pub fn power_button_mode(&self) -> PowerButtonMode {
        self.usable()
            .map_or(PowerButtonMode::BleKey, |c| c.power_button_mode)
    }

    pub fn store(&mut self, config: Config) {
        info!("Config: stored (configured={})", config.is_configured());
        self.cell.set(config);
    }

    pub fn clear(&mut self) {
        info!("Config: cleared");
        self.cell.clear();
    }

    pub fn is_dirty(&self) -> bool {
        self.cell.is_dirty()
    }

    pub async fn load_from_flash(&mut self, flash: &mut impl NorFlash) {
        match self.cell.load(flash).await {
            LoadOutcome::Loaded => info!("Config: loaded from flash"),
            LoadOutcome::Empty => info!("Config: none stored"),
            LoadOutcome::Discarded => warn!("Config: stored record unusable, discarded"),
        }
    }

    pub async fn save_to_flash(
        &mut self,
        flash: &mut impl NorFlash,
    ) -> Result<(), crate::error::StorageError> {
        self.cell.flush(flash).await
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock;
    use embassy_futures::block_on;

    fn configured() -> Config {
        let mut c = Config::default();
        c.set_field("wifi_ssid", "home").unwrap();
        c.set_field("wifi_password", "secret").unwrap();
        c.set_field("mqtt_host", "10.0.0.2").unwrap();
        c.set_field("configured", "1").unwrap();
        c
    }

    #[test]
    fn default_is_unconfigured() {
        let c = Config::default();
        assert!(!c.is_configured());
        assert_eq!(c.broker_port(), 1883);
        assert_eq!(c.device_name(), "Something Remote");
        assert_eq!(c.power_button_mode, PowerButtonMode::HaTrigger);
    }

    #[test]
    fn configured_needs_flag_ssid_and_host() {
        let mut c = configured();
        assert!(c.is_configured());
        c.broker_host.clear();
        assert!(!c.is_configured());
        let mut c = configured();
        c.configured = false;
        assert!(!c.is_configured());
    }

    #[test]
    fn set_field_parses_values() {
        let mut c = Config::default();
        c.set_field("mqtt_port", "8883").unwrap();
        c.set_field("power_button_mode", "ble").unwrap();
        assert_eq!(c.broker_port(), 8883);
        assert_eq!(c.power_button_mode, PowerButtonMode::BleKey);
        c.set_field("power_mode", "ha").unwrap();
        assert_eq!(c.power_button_mode, PowerButtonMode::HaTrigger);
        assert_eq!(c.set_field("mqtt_port", "x"), Err(Error::Encoding));
        assert_eq!(c.set_field("nope", "1"), Err(Error::Encoding));
        let long = "x".repeat(40);
        assert_eq!(c.set_field("ssid", &long), Err(Error::BufferOverflow));
    }

    #[test]
    fn portal_and_short_field_names_agree() {
        let mut a = Config::default();
        a.set_field("wifi_ssid", "home").unwrap();
        a.set_field("power_button_mode", "ble").unwrap();
        let mut b = Config::default();
        b.set_field("ssid", "home").unwrap();
        b.set_field("power_mode", "ble").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.wifi_ssid.as_str(), "home");
    }

    #[test]
    fn power_button_is_ble_key_until_configured() {
        let mut s = ConfigStore::at(0);
        assert_eq!(s.power_button_mode(), PowerButtonMode::BleKey);
        let mut half = Config::default();
        half.set_field("power_button_mode", "ha").unwrap();
        s.store(half);
        assert_eq!(s.power_button_mode(), PowerButtonMode::BleKey);
        s.store(configured());
        assert_eq!(s.power_button_mode(), PowerButtonMode::HaTrigger);
    }

    #[test]
    fn store_survives_reboot() {
        let mut flash = mock::flash();
        let mut s = ConfigStore::at(0);
        s.store(configured());
        block_on(s.save_to_flash(&mut flash)).unwrap();

        let mut t = ConfigStore::at(0);
        block_on(t.load_from_flash(&mut flash));
        assert!(t.is_configured());
        assert_eq!(t.get(), Some(&configured()));
    }

    #[test]
    fn clear_survives_reboot() {
        let mut flash = mock::flash();
        let mut s = ConfigStore::at(0);
        s.store(configured());
        block_on(s.save_to_flash(&mut flash)).unwrap();
        s.clear();
        block_on(s.save_to_flash(&mut flash)).unwrap();

        let mut t = ConfigStore::at(0);
        block_on(t.load_from_flash(&mut flash));
        assert!(t.get().is_none());
        assert_eq!(t.power_button_mode(), PowerButtonMode::BleKey);
    }
}
