//! Per-button debouncer.
//!
//! Each button keeps its last stable level and at most one pending edge.
//! The first edge that differs from the stable level arms a deadline one
//! window later; a contrary edge before the deadline cancels it (the pin
//! bounced back). An edge whose deadline passes undisturbed becomes a
//! [`ButtonEvent`].

use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::{ButtonEvent, ButtonId, Edge, RawEvent};

#[derive(Clone, Copy)]
struct Pending {
    edge: Edge,
    deadline: Instant,
}

#[derive(Clone, Copy)]
struct Slot {
    stable: Edge,
    pending: Option<Pending>,
}

impl Slot {
    const IDLE: Self = Self {
        stable: Edge::Released,
        pending: None,
    };
}

/// Stable events confirmed by one call.
pub type Confirmed = Vec<ButtonEvent, { ButtonId::COUNT }>;

pub struct Debouncer {
    window: Duration,
    slots: [Slot; ButtonId::COUNT],
}

impl Debouncer {
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            slots: [Slot::IDLE; ButtonId::COUNT],
        }
    }

    /// Confirm everything due by `ev.timestamp`, then register `ev`.
    ///
    /// Edges must be fed in capture order.
    pub fn feed(&mut self, ev: RawEvent) -> Confirmed {
        let confirmed = self.poll(ev.timestamp);
        self.on_edge(ev);
        confirmed
    }

    fn on_edge(&mut self, ev: RawEvent) {
        let slot = &mut self.slots[ev.button.index()];
        match slot.pending {
            None if ev.edge != slot.stable => {
                slot.pending = Some(Pending {
                    edge: ev.edge,
                    deadline: ev.timestamp + self.window,
                });
            }
            None => {}
            Some(p) if p.edge != ev.edge => {
                trace!("debounce: {} bounced", ev.button.name());
                slot.pending = None;
            }
            Some(_) => {}
        }
    }

    /// Confirm every pending edge whose deadline is at or before `now`,
    /// oldest first.
    pub fn poll(&mut self, now: Instant) -> Confirmed {
        let mut out = Confirmed::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(p) = slot.pending else { continue };
            if p.deadline > now {
                continue;
            }
            slot.stable = p.edge;
            slot.pending = None;
            if let Some(button) = ButtonId::from_index(i) {
                // One slot per button, so this never overflows.
                let _ = out.push(ButtonEvent {
                    button,
                    edge: p.edge,
                    timestamp: p.deadline,
                });
            }
        }
        out.sort_unstable_by_key(|e| (e.timestamp, e.button.index()));
        out
    }

    /// Earliest pending confirmation.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|s| s.pending.map(|p| p.deadline))
            .min()
    }

    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| s.pending.is_some())
    }

    /// Debounced level of `button`.
    pub fn is_pressed(&self, button: ButtonId) -> bool {
        self.slots[button.index()].stable == Edge::Pressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(30);

    fn raw(button: ButtonId, edge: Edge, ms: u64) -> RawEvent {
        RawEvent {
            button,
            edge,
            timestamp: Instant::from_millis(ms),
        }
    }

    #[test]
    fn clean_press_confirms_after_window() {
        let mut d = Debouncer::new(WINDOW);
        assert!(d.feed(raw(ButtonId::Up, Edge::Pressed, 100)).is_empty());
        assert!(d.has_pending());
        assert_eq!(d.next_deadline(), Some(Instant::from_millis(130)));

        assert!(d.poll(Instant::from_millis(129)).is_empty());
        let out = d.poll(Instant::from_millis(130));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge, Edge::Pressed);
        assert_eq!(out[0].timestamp, Instant::from_millis(130));
        assert!(d.is_pressed(ButtonId::Up));
        assert!(!d.has_pending());
    }

    #[test]
    fn bounce_restarts_window() {
        let mut d = Debouncer::new(WINDOW);
        d.feed(raw(ButtonId::Select, Edge::Pressed, 0));
        d.feed(raw(ButtonId::Select, Edge::Released, 4));
        d.feed(raw(ButtonId::Select, Edge::Pressed, 9));
        assert!(d.poll(Instant::from_millis(30)).is_empty());
        let out = d.poll(Instant::from_millis(39));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].button, ButtonId::Select);
    }

    #[test]
    fn glitch_back_to_stable_emits_nothing() {
        let mut d = Debouncer::new(WINDOW);
        d.feed(raw(ButtonId::Down, Edge::Pressed, 0));
        d.feed(raw(ButtonId::Down, Edge::Released, 10));
        assert!(!d.has_pending());
        assert!(d.poll(Instant::from_millis(1_000)).is_empty());
        assert!(!d.is_pressed(ButtonId::Down));
    }

    #[test]
    fn repeated_same_edge_keeps_deadline() {
        let mut d = Debouncer::new(WINDOW);
        d.feed(raw(ButtonId::Mute, Edge::Pressed, 0));
        d.feed(raw(ButtonId::Mute, Edge::Pressed, 20));
        assert_eq!(d.next_deadline(), Some(Instant::from_millis(30)));
    }

    #[test]
    fn feed_confirms_earlier_edges_first() {
        let mut d = Debouncer::new(WINDOW);
        d.feed(raw(ButtonId::Left, Edge::Pressed, 0));
        let out = d.feed(raw(ButtonId::Left, Edge::Released, 50));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge, Edge::Pressed);
        let out = d.poll(Instant::from_millis(80));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].edge, Edge::Released);
    }

    #[test]
    fn confirmations_come_out_in_time_order() {
        let mut d = Debouncer::new(WINDOW);
        d.feed(raw(ButtonId::Shortcut2, Edge::Pressed, 0));
        d.feed(raw(ButtonId::Power, Edge::Pressed, 5));
        let out = d.poll(Instant::from_millis(100));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].button, ButtonId::Shortcut2);
        assert_eq!(out[1].button, ButtonId::Power);
    }
}
