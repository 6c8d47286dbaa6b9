//! Everything Remote board support: pin map, reset reason, chip id and
//! System OFF entry.
//!
//! Registers touched here are ones the SoftDevice leaves to the application
//! (GPIO, FICR) or are read before it is enabled (RESETREAS).

use embassy_nrf::pac;
use embassy_nrf::pac::gpio::vals;

use crate::input::ButtonId;
use crate::power::WakePins;

/// (port, pin) per button, in [`ButtonId`] order.
pub const BUTTON_PINS: [(u8, u8); ButtonId::COUNT] = [
    (0, 2),  // Power
    (0, 3),  // Back
    (0, 4),  // Home
    (0, 5),  // PlayPause
    (0, 28), // Up
    (0, 29), // Left
    (0, 30), // Select
    (0, 31), // Right
    (1, 10), // Down
    (1, 11), // VolumeUp
    (1, 12), // Mute
    (1, 13), // ChannelUp
    (1, 14), // VolumeDown
    (1, 15), // Settings
    (0, 11), // ChannelDown
    (0, 12), // Shortcut3
    (1, 1),  // Shortcut4
    (1, 2),  // BrightnessDown
    (1, 3),  // BrightnessUp
    (1, 4),  // Shortcut1
    (1, 5),  // Shortcut2
];

/// MPU6050 INT, latched active-high.
pub const MOTION_INT_PIN: (u8, u8) = (0, 8);

fn port(n: u8) -> pac::gpio::Gpio {
    if n == 0 {
        pac::P0
    } else {
        pac::P1
    }
}

/// Read and clear RESETREAS. Must run before the SoftDevice is enabled.
/// `true` if this boot is a wake from System OFF via GPIO DETECT.
pub fn woke_from_system_off() -> bool {
    let reason = pac::POWER.resetreas().read();
    pac::POWER.resetreas().write(|w| w.0 = u32::MAX);
    debug!("Board: RESETREAS {=u32:#x}", reason.0);
    reason.off()
}

/// 64-bit factory device id from FICR.
pub fn chip_id() -> u64 {
    let lo = pac::FICR.deviceid(0).read() as u64;
    let hi = pac::FICR.deviceid(1).read() as u64;
    (hi << 32) | lo
}

fn arm(pin: (u8, u8), pull: vals::Pull, sense: vals::Sense) {
    port(pin.0).pin_cnf(pin.1 as usize).write(|w| {
        w.set_dir(vals::Dir::INPUT);
        w.set_input(vals::Input::CONNECT);
        w.set_pull(pull);
        w.set_sense(sense);
    });
}

/// Arm GPIO sense on `pins` and enter System OFF. RAM is lost; the next
/// boot starts from reset with RESETREAS.OFF set.
pub fn system_off(pins: WakePins) -> ! {
    for button in pins.buttons.iter() {
        arm(BUTTON_PINS[button.index()], vals::Pull::PULLUP, vals::Sense::LOW);
    }
    if pins.motion {
        arm(MOTION_INT_PIN, vals::Pull::PULLDOWN, vals::Sense::HIGH);
    }
    info!(
        "Board: System OFF ({} buttons, motion {})",
        pins.buttons.len(),
        pins.motion
    );
    unsafe {
        nrf_softdevice::raw::sd_power_system_off();
    }
    // Only reached under a debugger, which emulates System OFF.
    loop {
        cortex_m::asm::wfe();
    }
}

pub fn reset() -> ! {
    warn!("Board: system reset");
    cortex_m::peripheral::SCB::sys_reset()
}

/// SAADC sample of VDDH/5 (gain 1/6, 0.6 V reference, 12 bit) to cell
/// millivolts.
pub fn vddh_millivolts(sample: i16) -> u16 {
    let raw = sample.max(0) as u32;
    (raw * 3_600 * 5 / 4_096) as u16
}
