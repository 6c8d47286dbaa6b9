//! Tri-colour status LED on three GPIOs (active high).

use embassy_nrf::gpio::Output;

use crate::indicator::{IndicatorState, StatusIndicator};

pub struct LedIndicator {
    red: Output<'static>,
    green: Output<'static>,
    blue: Output<'static>,
}

impl LedIndicator {
    pub fn new(red: Output<'static>, green: Output<'static>, blue: Output<'static>) -> Self {
        Self { red, green, blue }
    }
}

fn drive(pin: &mut Output<'static>, on: bool) {
    if on {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

impl StatusIndicator for LedIndicator {
    fn show(&mut self, state: IndicatorState) {
        let (r, g, b) = state.rgb();
        drive(&mut self.red, r);
        drive(&mut self.green, g);
        drive(&mut self.blue, b);
    }
}
