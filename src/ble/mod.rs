//! Bluetooth Low Energy subsystem.
//!
//! The remote drives the Nordic SoftDevice S140 in **Peripheral** role as a
//! HID-over-GATT keyboard / consumer-control device:
//!
//! 1. **Session** - pure state machine for advertising, connection and
//!    bonding. Runs in the event loop and is host-testable.
//! 2. **Peripheral** (`embedded` only) - the radio task: GATT server,
//!    advertising, security handler. Talks to the session through
//!    [`HidLink`] commands and [`BleEvent`]s.

pub mod session;

#[cfg(feature = "embedded")]
pub mod peripheral;

use core::cell::Cell;

use crate::bond_store::{BondRecord, PeerAddress};
use crate::error::LinkError;
use crate::hid::HidReport;

/// How to advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertiseMode {
    /// No bond: general discoverable, accept pairing.
    Pairable,
    /// A bond exists: advertise for the bonded host to reconnect (pairing
    /// still accepted so a host that lost its keys can re-pair).
    Reconnect,
}

/// Events the radio task publishes for the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    /// A central connected; the link is not encrypted yet.
    Connected { peer: PeerAddress },
    /// Pairing completed and produced a new bond.
    Bonded(BondRecord),
    /// Link encrypted with the stored bond.
    Secured { peer: PeerAddress },
    /// Pairing or encryption failed or timed out.
    PairingFailed,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Commands the session issues to the radio. All calls enqueue and return.
pub trait HidLink {
    fn advertise(&mut self, mode: AdvertiseMode);

    /// Queue a key-down / key-up report pair. Both are queued or neither.
    fn send_reports(&mut self, pair: [HidReport; 2]) -> Result<(), LinkError>;

    fn disconnect(&mut self);

    /// Drop the in-RAM copy of the bond held by the security handler.
    fn forget_bonds(&mut self);

    /// Stretch advertising / connection intervals while in LightSleep.
    fn set_low_power(&mut self, low_power: bool);
}

/// One-slot hand-off for security outcomes raised inside synchronous
/// SoftDevice callbacks, drained by the connection task with a blocking
/// send. A pending [`BleEvent::Bonded`] is never overwritten: it carries
/// the only copy of the new key.
#[derive(Default)]
pub struct SecurityMailbox {
    slot: Cell<Option<BleEvent>>,
    superseded: Cell<u32>,
}

impl SecurityMailbox {
    pub const fn new() -> Self {
        Self {
            slot: Cell::new(None),
            superseded: Cell::new(0),
        }
    }

    pub fn post(&self, ev: BleEvent) {
        let keep = match (self.slot.get(), ev) {
            (None, _) => ev,
            (Some(pending @ BleEvent::Bonded(_)), BleEvent::Secured { .. }) => pending,
            (Some(_), ev) => ev,
        };
        if self.slot.get().is_some() {
            warn!("BLE: security event superseded before delivery");
            self.superseded.set(self.superseded.get().wrapping_add(1));
        }
        self.slot.set(Some(keep));
    }

    pub fn take(&self) -> Option<BleEvent> {
        self.slot.take()
    }

    /// Events replaced by a later one before they were delivered.
    pub fn superseded(&self) -> u32 {
        self.superseded.get()
    }
}
