//! Unit tests for HID report construction and the Report Map.
//!
//! These tests run on the host (not embedded) and verify the pure
//! logic of report building and serialization.

use super::consumer::{ConsumerReport, ConsumerUsage};
use super::keyboard::{keys, KeyboardLeds, KeyboardReport};
use super::{press_pair, HidReport, REPORT_ID_CONSUMER, REPORT_ID_KEYBOARD, REPORT_MAP};
use crate::action::HidUsage;

// ═══════════════════════════════════════════════════════════════════════════
// Keyboard Report Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn keyboard_report_empty() {
    let report = KeyboardReport::empty();
    assert!(report.is_empty());
    assert_eq!(report.modifier, 0);
    assert_eq!(report.keycodes, [0; 6]);
}

#[test]
fn keyboard_report_single_key() {
    let report = KeyboardReport::key(keys::RIGHT_ARROW);
    assert!(!report.is_empty());
    assert_eq!(report.keycodes, [0x4F, 0, 0, 0, 0, 0]);
}

#[test]
fn keyboard_report_serialize() {
    let report = KeyboardReport::key(keys::ENTER);
    let mut buf = [0u8; 8];
    assert_eq!(report.serialize(&mut buf), 8);
    assert_eq!(buf, [0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn keyboard_report_serialize_buffer_too_small() {
    let report = KeyboardReport::empty();
    let mut small_buf = [0u8; 4];
    let written = report.serialize(&mut small_buf);
    assert_eq!(written, 0); // Should fail gracefully
}

#[test]
fn keyboard_leds_masks_padding_bits() {
    let leds = KeyboardLeds::from_bytes(&[0xE2]).unwrap();
    assert_eq!(leds.0, 0x02);
    assert!(leds.caps_lock());
    assert!(KeyboardLeds::from_bytes(&[]).is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// Press Pair Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn press_pair_keyboard_is_down_then_zero() {
    let [down, up] = press_pair(HidUsage::Keyboard(keys::RIGHT_ARROW));
    assert!(down.is_keyboard());
    assert_eq!(down.report_id(), REPORT_ID_KEYBOARD);
    assert!(!down.is_release());
    assert_eq!(up, HidReport::Keyboard(KeyboardReport::empty()));
    assert!(up.is_release());
}

#[test]
fn press_pair_consumer_stays_on_consumer_report() {
    let [down, up] = press_pair(HidUsage::Consumer(ConsumerUsage::Home as u16));
    assert!(down.is_consumer());
    assert_eq!(down.report_id(), REPORT_ID_CONSUMER);
    assert_eq!(up.report_id(), REPORT_ID_CONSUMER);
    assert!(up.is_release());

    let mut buf = [0xFFu8; 8];
    assert_eq!(down.serialize(&mut buf), 2);
    assert_eq!(&buf[..2], &[0x23, 0x02]);
    assert_eq!(up.serialize(&mut buf), 2);
    assert_eq!(&buf[..2], &[0x00, 0x00]);
}

#[test]
fn consumer_report_carries_raw_usage() {
    let report = ConsumerReport::new(ConsumerUsage::VolumeUp as u16);
    assert_eq!(report.usage, 0x00E9);
    assert!(!report.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Report Map Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn report_map_declares_both_report_ids() {
    let ids: std::vec::Vec<u8> = REPORT_MAP
        .windows(2)
        .filter(|w| w[0] == 0x85)
        .map(|w| w[1])
        .collect();
    assert_eq!(ids, [REPORT_ID_KEYBOARD, REPORT_ID_CONSUMER]);
}

#[test]
fn report_map_collections_balance() {
    let opens = REPORT_MAP
        .windows(2)
        .filter(|w| w[0] == 0xA1 && w[1] == 0x01)
        .count();
    let closes = REPORT_MAP.iter().filter(|&&b| b == 0xC0).count();
    assert_eq!(opens, 2);
    assert_eq!(closes, 2);
    assert_eq!(REPORT_MAP.last(), Some(&0xC0));
    assert_eq!(&REPORT_MAP[..4], &[0x05, 0x01, 0x09, 0x06]);
}
