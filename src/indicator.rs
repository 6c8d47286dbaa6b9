//! Tri-colour status LED.
//!
//! The core only decides *what* to show; the board drives the pins through
//! [`StatusIndicator`].

use embassy_time::Instant;

use crate::ble::session::SessionState;
use crate::config::KEY_FLASH;

// RGB colour constants
pub const RGB_OFF: (bool, bool, bool) = (false, false, false);
pub const RGB_RED: (bool, bool, bool) = (true, false, false);
pub const RGB_GRN: (bool, bool, bool) = (false, true, false);
pub const RGB_BLU: (bool, bool, bool) = (false, false, true);
pub const RGB_WHT: (bool, bool, bool) = (true, true, true);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndicatorState {
    Initializing,
    Advertising,
    Connected,
    /// Short flash after a key went out.
    KeySent,
    Error,
    Off,
}

impl IndicatorState {
    pub fn rgb(self) -> (bool, bool, bool) {
        match self {
            IndicatorState::Initializing | IndicatorState::Error => RGB_RED,
            IndicatorState::Advertising => RGB_BLU,
            IndicatorState::Connected => RGB_GRN,
            IndicatorState::KeySent => RGB_WHT,
            IndicatorState::Off => RGB_OFF,
        }
    }

    /// Resting colour for a BLE session state.
    pub fn for_session(state: SessionState) -> Self {
        match state {
            SessionState::Unbonded | SessionState::Advertising => IndicatorState::Advertising,
            SessionState::Connected | SessionState::ConnectedBonded => IndicatorState::Connected,
        }
    }
}

/// Output collaborator.
pub trait StatusIndicator {
    fn show(&mut self, state: IndicatorState);
}

/// Resting state plus the transient key-sent flash.
pub struct Indicator {
    base: IndicatorState,
    flash_until: Option<Instant>,
}

impl Indicator {
    pub const fn new() -> Self {
        Self {
            base: IndicatorState::Initializing,
            flash_until: None,
        }
    }

    pub fn base(&self) -> IndicatorState {
        self.base
    }

    pub fn set(&mut self, state: IndicatorState, out: &mut impl StatusIndicator) {
        if state == self.base {
            return;
        }
        self.base = state;
        if self.flash_until.is_none() {
            out.show(state);
        }
    }

    pub fn flash_key(&mut self, now: Instant, out: &mut impl StatusIndicator) {
        self.flash_until = Some(now + KEY_FLASH);
        out.show(IndicatorState::KeySent);
    }

    pub fn poll(&mut self, now: Instant, out: &mut impl StatusIndicator) {
        if self.flash_until.is_some_and(|t| t <= now) {
            self.flash_until = None;
            out.show(self.base);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.flash_until
    }
}

impl Default for Indicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    pub(crate) struct Recorder(pub Vec<IndicatorState>);

    impl StatusIndicator for Recorder {
        fn show(&mut self, state: IndicatorState) {
            self.0.push(state);
        }
    }

    #[test]
    fn colours() {
        assert_eq!(IndicatorState::Advertising.rgb(), RGB_BLU);
        assert_eq!(IndicatorState::Connected.rgb(), RGB_GRN);
        assert_eq!(IndicatorState::KeySent.rgb(), RGB_WHT);
        assert_eq!(IndicatorState::Error.rgb(), RGB_RED);
        assert_eq!(IndicatorState::Off.rgb(), RGB_OFF);
    }

    #[test]
    fn key_flash_reverts_to_link_colour() {
        let mut out = Recorder::default();
        let mut ind = Indicator::new();
        ind.set(IndicatorState::Connected, &mut out);
        ind.flash_key(Instant::from_millis(1_000), &mut out);
        ind.poll(Instant::from_millis(1_079), &mut out);
        ind.poll(Instant::from_millis(1_080), &mut out);
        assert_eq!(
            out.0,
            [
                IndicatorState::Connected,
                IndicatorState::KeySent,
                IndicatorState::Connected
            ]
        );
        assert_eq!(ind.next_deadline(), None);
    }

    #[test]
    fn state_change_during_flash_is_deferred() {
        let mut out = Recorder::default();
        let mut ind = Indicator::new();
        ind.flash_key(Instant::from_millis(0), &mut out);
        ind.set(IndicatorState::Advertising, &mut out);
        ind.poll(Instant::from_millis(100), &mut out);
        assert_eq!(
            out.0,
            [IndicatorState::KeySent, IndicatorState::Advertising]
        );
    }

    #[test]
    fn session_mapping() {
        assert_eq!(
            IndicatorState::for_session(SessionState::ConnectedBonded),
            IndicatorState::Connected
        );
        assert_eq!(
            IndicatorState::for_session(SessionState::Advertising),
            IndicatorState::Advertising
        );
    }
}
