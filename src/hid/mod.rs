//! HID-over-GATT report types and the combined Report Map.
//!
//! Every logical key press is sent as a pair of reports on the same
//! Report ID: key-down, then the all-zero key-up.

pub mod consumer;
pub mod keyboard;

#[cfg(test)]
mod tests;

use crate::action::HidUsage;
use consumer::{ConsumerReport, CONSUMER_REPORT_DESCRIPTOR};
use keyboard::{KeyboardReport, KEYBOARD_REPORT_DESCRIPTOR};

/// Report ID of the keyboard collection.
pub const REPORT_ID_KEYBOARD: u8 = 1;
/// Report ID of the consumer-control collection.
pub const REPORT_ID_CONSUMER: u8 = 2;

/// Largest serialised report.
pub const MAX_REPORT_SIZE: usize = keyboard::KEYBOARD_REPORT_SIZE;

const fn concat<const N: usize>(a: &[u8], b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let mut i = 0;
    while i < a.len() {
        out[i] = a[i];
        i += 1;
    }
    let mut j = 0;
    while j < b.len() {
        out[a.len() + j] = b[j];
        j += 1;
    }
    out
}

const REPORT_MAP_LEN: usize = KEYBOARD_REPORT_DESCRIPTOR.len() + CONSUMER_REPORT_DESCRIPTOR.len();

/// HID Report Map: keyboard (ID 1) followed by consumer control (ID 2).
pub const REPORT_MAP: [u8; REPORT_MAP_LEN] =
    concat(KEYBOARD_REPORT_DESCRIPTOR, CONSUMER_REPORT_DESCRIPTOR);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidReport {
    Keyboard(KeyboardReport),
    Consumer(ConsumerReport),
}

impl HidReport {
    /// Key-down report for `usage`.
    pub fn press(usage: HidUsage) -> Self {
        match usage {
            HidUsage::Keyboard(code) => HidReport::Keyboard(KeyboardReport::key(code)),
            HidUsage::Consumer(code) => HidReport::Consumer(ConsumerReport::new(code)),
        }
    }

    /// All-zero key-up report on the same Report ID as `self`.
    pub fn release(&self) -> Self {
        match self {
            HidReport::Keyboard(_) => HidReport::Keyboard(KeyboardReport::empty()),
            HidReport::Consumer(_) => HidReport::Consumer(ConsumerReport::empty()),
        }
    }

    #[cfg(test)]
    pub fn report_id(&self) -> u8 {
        match self {
            HidReport::Keyboard(_) => REPORT_ID_KEYBOARD,
            HidReport::Consumer(_) => REPORT_ID_CONSUMER,
        }
    }

    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            HidReport::Keyboard(k) => k.serialize(buf),
            HidReport::Consumer(c) => c.serialize(buf),
        }
    }

    #[cfg(test)]
    pub fn is_release(&self) -> bool {
        match self {
            HidReport::Keyboard(k) => k.is_empty(),
            HidReport::Consumer(c) => c.is_empty(),
        }
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, HidReport::Keyboard(_))
    }

    #[cfg(test)]
    pub fn is_consumer(&self) -> bool {
        matches!(self, HidReport::Consumer(_))
    }
}

/// The down/up report pair for one logical press.
pub fn press_pair(usage: HidUsage) -> [HidReport; 2] {
    let down = HidReport::press(usage);
    [down, down.release()]
}
