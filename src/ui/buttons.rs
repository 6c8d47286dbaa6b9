//! GPIO button edge capture.
//!
//! Each button has its own task that waits for any pin edge, timestamps
//! it and pushes it into [`INPUT_QUEUE`], then wakes the event loop
//! through [`INPUT_SIGNAL`]. No filtering beyond collapsing repeated
//! levels; the debouncer sees every real transition.

use embassy_nrf::gpio::{AnyPin, Input, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;

use crate::config::INPUT_QUEUE_DEPTH;
use crate::input::queue::EventQueue;
use crate::input::{ButtonId, Edge};
use crate::power::WakeSource;

/// Raw edges, producer side in the button tasks.
pub static INPUT_QUEUE: EventQueue<INPUT_QUEUE_DEPTH> = EventQueue::new();

/// Raised whenever [`INPUT_QUEUE`] gained an edge.
pub static INPUT_SIGNAL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

fn level(btn: &Input<'_>) -> Edge {
    if btn.is_low() {
        Edge::Pressed
    } else {
        Edge::Released
    }
}

/// Run a single button edge loop. Never returns.
pub async fn button_task(pin: AnyPin, button: ButtonId, wake_source: WakeSource) -> ! {
    let mut btn = Input::new(pin, Pull::Up);
    let mut last = Edge::at_boot(wake_source, level(&btn));

    loop {
        let edge = level(&btn);
        if edge != last {
            last = edge;
            INPUT_QUEUE.on_pin_transition(button, edge, Instant::now());
            INPUT_SIGNAL.signal(());
        }
        btn.wait_for_any_edge().await;
    }
}
