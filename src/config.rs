//! Application-wide constants and compile-time configuration.
//!
//! All hardware pin assignments, timing parameters, and protocol
//! constants live here so they can be tuned in one place.

use embassy_time::Duration;

// Input

/// Button debounce window (ms). An edge must stay put this long to count.
pub const BUTTON_DEBOUNCE_MS: u64 = 30;

/// Depth of the interrupt → event-loop raw edge queue.
pub const INPUT_QUEUE_DEPTH: usize = 32;

/// Hold time for the two-button system combos.
pub const COMBO_HOLD_SHORT: Duration = Duration::from_secs(5);

/// Hold time for the three-button factory combo.
pub const COMBO_HOLD_LONG: Duration = Duration::from_secs(10);

// Power

/// Inactivity before Active drops to Idle (and straight on to LightSleep).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Time spent in LightSleep before committing to DeepSleep (System OFF).
pub const LIGHT_SLEEP_TIMEOUT: Duration = Duration::from_secs(60 * 60);

// BLE

/// Advertised GAP device name.
pub const BLE_DEVICE_NAME: &str = "Something Remote";

/// HID appearance: generic remote control.
pub const BLE_APPEARANCE: u16 = 0x0180;

/// Fast advertising interval (0.625 ms units). 48 = 30 ms.
pub const BLE_ADV_INTERVAL_FAST: u32 = 48;

/// Low-power advertising interval used in LightSleep. 1600 = 1 s.
pub const BLE_ADV_INTERVAL_SLOW: u32 = 1600;

/// Connection interval range (1.25 ms units). 12..24 = 15..30 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 12;
pub const BLE_CONN_INTERVAL_MAX: u16 = 24;

/// Peripheral latency while active, and while in LightSleep.
pub const BLE_SLAVE_LATENCY: u16 = 0;
pub const BLE_SLAVE_LATENCY_LOW_POWER: u16 = 30;

/// Supervision timeout (10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Link must be encrypted within this long of connecting or it counts as
/// a failed pairing.
pub const BLE_SECURE_TIMEOUT: Duration = Duration::from_secs(30);

// Automation bridge

/// Reconnect backoff, doubling from the first value up to the cap.
pub const BROKER_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BROKER_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// MQTT keep-alive negotiated with the broker (seconds).
pub const BROKER_KEEPALIVE_SECS: u16 = 60;

/// Ping period; a third of the keep-alive.
pub const BROKER_PING_INTERVAL: Duration = Duration::from_secs(20);

/// No traffic from the broker for this long is treated as a disconnect.
pub const BROKER_SESSION_TIMEOUT: Duration = Duration::from_secs(90);

/// Give up on a connect attempt after this long.
pub const BROKER_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Minimum spacing of battery state publications.
pub const BATTERY_REPORT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Discovery prefix used by the home-automation server.
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Device identifier prefix; the chip id suffix is appended at boot.
pub const DEVICE_ID_PREFIX: &str = "something_remote_";

pub const DEVICE_MANUFACTURER: &str = "DIY";
pub const DEVICE_MODEL: &str = "Everything Remote";
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Indicator

/// How long the key-sent flash stays lit.
pub const KEY_FLASH: Duration = Duration::from_millis(80);

// Motion sensor

/// MPU6050 I2C address (AD0 low).
pub const MPU6050_ADDR: u8 = 0x68;

// GPIO pin assignments (Everything Remote board)
//
// Button pins live in `board::BUTTON_PINS`; the rest are selected in
// `main.rs`.
//
//   Buttons        → P0.02..P0.05, P0.28..P0.31, P1.10..P1.15, P0.11..P0.12, P1.01..P1.05
//   I²C SDA/SCL    → P0.26 / P0.27
//   MPU INT        → P0.08
//   LED R/G/B      → P0.13 / P0.14 / P0.15
//   UART TX/RX     → P0.06 / P0.07 (WiFi co-processor, 115200 8N1)

/// How often the battery voltage is sampled.
pub const BATTERY_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

// Persistent storage

/// Flash page size for nRF52840 (4 KB).
pub const FLASH_PAGE_SIZE: u32 = 4096;

/// Flash page index where the bond region starts.
pub const BOND_FLASH_PAGE_START: u32 = 240;

/// Flash page index where the settings region starts.
pub const CONFIG_FLASH_PAGE_START: u32 = 242;

/// Pages per record region; the map needs at least two to reclaim one.
pub const STORE_PAGES: u32 = 2;
