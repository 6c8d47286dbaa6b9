//! Consumer Control HID support - media and navigation keys, Report ID 2.
//!
//! Consumer Control is a separate HID usage page (0x0C) that handles:
//! - Volume Up/Down/Mute, Play/Pause
//! - Application controls (AC Back, AC Home)
//! - Power
//!
//! Streaming boxes map AC Back / AC Home to their own back and home
//! actions, which is why those live here rather than on the keyboard.

/// Consumer control report size (2 bytes for usage ID).
pub const CONSUMER_REPORT_SIZE: usize = 2;

/// Consumer control usage codes used by the remote (Usage Page 0x0C).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ConsumerUsage {
    /// Power toggle.
    Power = 0x0030,
    /// Play/Pause toggle.
    PlayPause = 0x00CD,
    /// Mute toggle.
    Mute = 0x00E2,
    /// Volume up.
    VolumeUp = 0x00E9,
    /// Volume down.
    VolumeDown = 0x00EA,
    /// AC Home.
    Home = 0x0223,
    /// AC Back.
    Back = 0x0224,
}

/// Consumer Control HID report.
///
/// Simple 2-byte report containing a single usage code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConsumerReport {
    /// Active consumer control usage (little-endian u16).
    pub usage: u16,
}

impl ConsumerReport {
    /// Create an empty (no keys pressed) report.
    pub const fn empty() -> Self {
        Self { usage: 0 }
    }

    /// Create a report with a single raw usage code.
    pub const fn new(usage: u16) -> Self {
        Self { usage }
    }

    /// Serialize to report bytes.
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < CONSUMER_REPORT_SIZE {
            return 0;
        }
        buf[..CONSUMER_REPORT_SIZE].copy_from_slice(&self.usage.to_le_bytes());
        CONSUMER_REPORT_SIZE
    }

    /// Check if any key is pressed.
    pub fn is_empty(&self) -> bool {
        self.usage == 0
    }
}

/// Consumer Control application collection with Report ID 2.
///
/// A single 16-bit array usage.
pub const CONSUMER_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x03, //   Logical Maximum (1023)
    0x19, 0x00, //   Usage Minimum (0)
    0x2A, 0xFF, 0x03, //   Usage Maximum (1023)
    0x75, 0x10, //   Report Size (16)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x00, //   Input (Data, Array, Absolute)
    0xC0, // End Collection
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_report_empty() {
        let report = ConsumerReport::empty();
        assert!(report.is_empty());
        assert_eq!(report.usage, 0);
    }

    #[test]
    fn consumer_report_serialize_little_endian() {
        let report = ConsumerReport::new(ConsumerUsage::Back as u16);
        let mut buf = [0u8; 2];
        assert_eq!(report.serialize(&mut buf), 2);
        assert_eq!(buf, [0x24, 0x02]);
    }

    #[test]
    fn consumer_report_short_buffer() {
        let report = ConsumerReport::new(ConsumerUsage::Mute as u16);
        let mut buf = [0u8; 1];
        assert_eq!(report.serialize(&mut buf), 0);
    }

    #[test]
    fn usage_codes_match_the_consumer_page() {
        assert_eq!(ConsumerUsage::Power as u16, 0x0030);
        assert_eq!(ConsumerUsage::Home as u16, 0x0223);
        assert_eq!(ConsumerUsage::Back as u16, 0x0224);
    }
}
