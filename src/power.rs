//! Power management: the sleep-state machine and wake arbitration.
//!
//! ```text
//!  Active ──5 min idle──► Idle ──► LightSleep ──1 h──► DeepSleep
//!     ▲                                                   │
//!     └──────────── any wake event, from any state ───────┘ (cold boot)
//! ```
//!
//! nRF52840 power modes behind these states:
//! - Active / Idle: System ON, radio at normal parameters
//! - LightSleep: System ON idle, BLE advertising/connection at low duty cycle
//! - DeepSleep: System OFF, wake on GPIO sense only (~0.4 µA). RAM is lost,
//!   so only what the Bond Store and Config store hold survives.

use embassy_time::Instant;

use crate::config::{IDLE_TIMEOUT, LIGHT_SLEEP_TIMEOUT};
use crate::input::{ButtonId, ButtonSet};

/// Power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Active,
    /// Transient: passes straight through to LightSleep.
    Idle,
    LightSleep,
    DeepSleep,
}

/// What brought this boot about. Latched once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeSource {
    Button,
    Motion,
    /// Cold boot.
    None,
}

impl WakeSource {
    /// Classify a boot. The motion interrupt is latched active-high until
    /// INT_STATUS is read, so a high pin after a System OFF wake means the
    /// sensor woke us; any other System OFF wake was a button. Without a
    /// sensor the pin level means nothing.
    pub fn from_reset(
        woke_from_system_off: bool,
        motion_pin_high: bool,
        sensor_present: bool,
    ) -> Self {
        match (woke_from_system_off, motion_pin_high && sensor_present) {
            (false, _) => WakeSource::None,
            (true, true) => WakeSource::Motion,
            (true, false) => WakeSource::Button,
        }
    }
}

/// Runtime wake signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeReason {
    /// Stable button edge.
    Button,
    /// Motion interrupt. Ignored once the sensor is considered absent.
    Motion,
    /// BLE (re)connection or HID traffic.
    BleActivity,
}

/// Pins armed for wake from System OFF.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakePins {
    pub buttons: ButtonSet,
    pub motion: bool,
}

pub struct PowerManager {
    state: PowerState,
    wake_source: WakeSource,
    sensor_present: bool,
    last_activity: Instant,
}

impl PowerManager {
    /// `sensor_present` is the result of the one-time boot probe.
    pub fn new(now: Instant, wake_source: WakeSource, sensor_present: bool) -> Self {
        info!(
            "Power: boot wake={:?} motion_sensor={}",
            wake_source, sensor_present
        );
        Self {
            state: PowerState::Active,
            wake_source,
            sensor_present,
            last_activity: now,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn wake_source(&self) -> WakeSource {
        self.wake_source
    }

    pub fn sensor_present(&self) -> bool {
        self.sensor_present
    }

    /// Runtime sensor failure. Treated as absent for the rest of the session.
    pub fn sensor_failed(&mut self) {
        if self.sensor_present {
            warn!("Power: motion sensor failed, falling back to power button");
            self.sensor_present = false;
        }
    }

    fn set_state(&mut self, next: PowerState) {
        info!("Power: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Return to Active and restart the idle timer. Repeated wakes are
    /// harmless. Returns the new state if it changed.
    pub fn wake(&mut self, reason: WakeReason, now: Instant) -> Option<PowerState> {
        if reason == WakeReason::Motion && !self.sensor_present {
            return None;
        }
        self.last_activity = now;
        if self.state == PowerState::Active {
            return None;
        }
        debug!("Power: wake by {:?}", reason);
        self.set_state(PowerState::Active);
        Some(PowerState::Active)
    }

    /// Advance on inactivity. `busy` means a debounce or combo timer is
    /// pending, which counts as activity. Returns the new state if it
    /// changed.
    pub fn tick(&mut self, now: Instant, busy: bool) -> Option<PowerState> {
        if busy {
            if self.state == PowerState::Active {
                self.last_activity = now;
            }
            return None;
        }
        let before = self.state;
        loop {
            let next = match self.state {
                PowerState::Active if now >= self.idle_at() => PowerState::Idle,
                PowerState::Idle => PowerState::LightSleep,
                PowerState::LightSleep if now >= self.deep_sleep_at() => PowerState::DeepSleep,
                _ => break,
            };
            self.set_state(next);
        }
        (self.state != before).then_some(self.state)
    }

    fn idle_at(&self) -> Instant {
        self.last_activity + IDLE_TIMEOUT
    }

    // LightSleep is entered at the idle deadline, whenever it was observed.
    fn deep_sleep_at(&self) -> Instant {
        self.idle_at() + LIGHT_SLEEP_TIMEOUT
    }

    /// Next instant at which [`tick`](Self::tick) can change state.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            PowerState::Active => Some(self.idle_at()),
            PowerState::Idle => Some(self.last_activity),
            PowerState::LightSleep => Some(self.deep_sleep_at()),
            PowerState::DeepSleep => None,
        }
    }

    /// Pins to arm before System OFF. Without a motion sensor only the
    /// power button can wake the device.
    pub fn deep_sleep_wake_pins(&self) -> WakePins {
        if self.sensor_present {
            WakePins {
                buttons: ButtonSet::of(&ButtonId::ALL),
                motion: true,
            }
        } else {
            WakePins {
                buttons: ButtonSet::of(&[ButtonId::Power]),
                motion: false,
            }
        }
    }
}

/// Single-cell LiPo charge estimate, linear between 3.3 V and 4.2 V.
pub fn battery_percent(millivolts: u16) -> u8 {
    const EMPTY_MV: u32 = 3_300;
    const FULL_MV: u32 = 4_200;
    let mv = (millivolts as u32).clamp(EMPTY_MV, FULL_MV);
    ((mv - EMPTY_MV) * 100 / (FULL_MV - EMPTY_MV)) as u8
}
