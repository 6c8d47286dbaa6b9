//! BLE HID session state machine.
//!
//! ```text
//!  Unbonded ──start──► Advertising ──Connected──► Connected
//!                          ▲  ▲                      │ Bonded / Secured
//!              Disconnected│  │PairingFailed         ▼
//!                          └──┴───────────── ConnectedBonded
//! ```
//!
//! Keys are only sent on an encrypted, bonded link; anything else is
//! dropped and counted.

use super::{AdvertiseMode, BleEvent, HidLink};
use crate::action::HidUsage;
use crate::bond_store::BondStore;
use crate::hid::press_pair;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Not started, or nothing to advertise for yet.
    Unbonded,
    Advertising,
    /// Link up, not yet encrypted with a bond.
    Connected,
    ConnectedBonded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionStats {
    pub keys_sent: u32,
    pub keys_dropped: u32,
    pub pairing_failures: u32,
}

pub struct HidSession {
    state: SessionState,
    stats: SessionStats,
}

impl HidSession {
    pub const fn new() -> Self {
        Self {
            state: SessionState::Unbonded,
            stats: SessionStats {
                keys_sent: 0,
                keys_dropped: 0,
                pairing_failures: 0,
            },
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected | SessionState::ConnectedBonded
        )
    }

    fn set_state(&mut self, next: SessionState) -> Option<SessionState> {
        if self.state == next {
            return None;
        }
        info!("BLE: {:?} -> {:?}", self.state, next);
        self.state = next;
        Some(next)
    }

    fn advertise(&mut self, bonds: &BondStore, link: &mut impl HidLink) -> Option<SessionState> {
        let mode = if bonds.has_bond() {
            AdvertiseMode::Reconnect
        } else {
            AdvertiseMode::Pairable
        };
        link.advertise(mode);
        self.set_state(SessionState::Advertising)
    }

    /// Begin advertising. Reconnect mode if a bond was loaded.
    pub fn start(&mut self, bonds: &BondStore, link: &mut impl HidLink) -> Option<SessionState> {
        self.advertise(bonds, link)
    }

    /// Apply a radio event. Returns the new state if it changed.
    pub fn on_event(
        &mut self,
        event: BleEvent,
        bonds: &mut BondStore,
        link: &mut impl HidLink,
    ) -> Option<SessionState> {
        match event {
            BleEvent::Connected { .. } => self.set_state(SessionState::Connected),
            BleEvent::Bonded(record) => {
                if !self.is_connected() {
                    warn!("BLE: bond reported without a link, ignored");
                    return None;
                }
                bonds.replace(record);
                self.set_state(SessionState::ConnectedBonded)
            }
            BleEvent::Secured { .. } => {
                if !self.is_connected() {
                    return None;
                }
                self.set_state(SessionState::ConnectedBonded)
            }
            BleEvent::PairingFailed => {
                self.stats.pairing_failures += 1;
                warn!("BLE: pairing failed, back to advertising");
                if self.is_connected() {
                    link.disconnect();
                }
                self.advertise(bonds, link)
            }
            BleEvent::Disconnected => {
                if !self.is_connected() {
                    return None;
                }
                self.advertise(bonds, link)
            }
        }
    }

    /// Send one logical key press (down + up). Returns `false` if dropped.
    pub fn send_key(&mut self, usage: HidUsage, link: &mut impl HidLink) -> bool {
        if self.state != SessionState::ConnectedBonded {
            self.stats.keys_dropped += 1;
            debug!("BLE: key {:?} dropped in {:?}", usage, self.state);
            return false;
        }
        match link.send_reports(press_pair(usage)) {
            Ok(()) => {
                self.stats.keys_sent += 1;
                true
            }
            Err(e) => {
                self.stats.keys_dropped += 1;
                warn!("BLE: key dropped: {:?}", e);
                false
            }
        }
    }

    /// Destroy the bond, drop any link and advertise as pairable. Idempotent.
    pub fn clear_bonds(
        &mut self,
        bonds: &mut BondStore,
        link: &mut impl HidLink,
    ) -> Option<SessionState> {
        bonds.clear();
        link.forget_bonds();
        if self.is_connected() {
            link.disconnect();
        }
        link.advertise(AdvertiseMode::Pairable);
        self.set_state(SessionState::Advertising)
    }
}

impl Default for HidSession {
    fn default() -> Self {
        Self::new()
    }
}
