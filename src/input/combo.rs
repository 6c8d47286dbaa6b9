//! Multi-button combo detection with deferred taps.
//!
//! Buttons that take part in any combo do not act on press. Their tap is
//! resolved on release, once it is known whether a combo completed while
//! they were down. Buttons outside every combo tap immediately on press.
//!
//! Only one rule is armed at a time: the largest rule whose buttons are all
//! held (earlier table entries win ties). A rule is (re)armed on a press and
//! cancelled by the release of any of its members.

use embassy_time::{Duration, Instant};

use super::{ButtonEvent, ButtonId, ButtonSet, Edge};
use crate::action::SystemAction;
use crate::config::{COMBO_HOLD_LONG, COMBO_HOLD_SHORT};

/// A set of buttons that must be held together for `hold`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ComboRule {
    pub buttons: ButtonSet,
    pub hold: Duration,
    pub action: SystemAction,
}

/// System combos of the Everything Remote.
pub const COMBO_RULES: [ComboRule; 3] = [
    ComboRule {
        buttons: ButtonSet::of(&[ButtonId::Power, ButtonId::Back]),
        hold: COMBO_HOLD_SHORT,
        action: SystemAction::ClearBonds,
    },
    ComboRule {
        buttons: ButtonSet::of(&[ButtonId::Back, ButtonId::Home]),
        hold: COMBO_HOLD_SHORT,
        action: SystemAction::EnterSetup,
    },
    ComboRule {
        buttons: ButtonSet::of(&[ButtonId::Power, ButtonId::Back, ButtonId::Home]),
        hold: COMBO_HOLD_LONG,
        action: SystemAction::ClearConfig,
    },
];

/// Every rule has at least two buttons and no two rules share a set.
pub const fn rules_are_valid(rules: &[ComboRule]) -> bool {
    let mut i = 0;
    while i < rules.len() {
        if rules[i].buttons.len() < 2 {
            return false;
        }
        let mut j = i + 1;
        while j < rules.len() {
            if rules[i].buttons.bits() == rules[j].buttons.bits() {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(rules_are_valid(&COMBO_RULES));

/// Outcome of input resolution: exactly one per tap or completed combo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolved {
    Tap(ButtonId),
    Combo(SystemAction),
}

#[derive(Clone, Copy, Debug)]
struct Armed {
    rule: usize,
    deadline: Instant,
    fired: bool,
}

pub struct ComboEngine {
    rules: &'static [ComboRule],
    members: ButtonSet,
    held: ButtonSet,
    consumed: ButtonSet,
    armed: Option<Armed>,
}

impl ComboEngine {
    pub fn new(rules: &'static [ComboRule]) -> Self {
        let mut members = ButtonSet::EMPTY;
        for r in rules {
            members.union(r.buttons);
        }
        Self {
            rules,
            members,
            held: ButtonSet::EMPTY,
            consumed: ButtonSet::EMPTY,
            armed: None,
        }
    }

    /// Feed one stable edge.
    pub fn on_event(&mut self, ev: ButtonEvent) -> Option<Resolved> {
        match ev.edge {
            Edge::Pressed => self.on_press(ev.button, ev.timestamp),
            Edge::Released => self.on_release(ev.button),
        }
    }

    fn on_press(&mut self, button: ButtonId, now: Instant) -> Option<Resolved> {
        self.held.insert(button);
        self.consumed.remove(button);

        if let Some(best) = self.best_rule() {
            if self.armed.map(|a| a.rule) != Some(best) {
                let rule = &self.rules[best];
                debug!(
                    "combo: armed {} ({} ms)",
                    rule.action.id(),
                    rule.hold.as_millis()
                );
                self.armed = Some(Armed {
                    rule: best,
                    deadline: now + rule.hold,
                    fired: false,
                });
            }
        }

        if self.members.contains(button) {
            None
        } else {
            Some(Resolved::Tap(button))
        }
    }

    fn on_release(&mut self, button: ButtonId) -> Option<Resolved> {
        self.held.remove(button);

        if let Some(a) = self.armed {
            if self.rules[a.rule].buttons.contains(button) {
                if !a.fired {
                    debug!("combo: {} cancelled", self.rules[a.rule].action.id());
                }
                self.armed = None;
            }
        }

        if !self.members.contains(button) {
            return None;
        }
        if self.consumed.contains(button) {
            self.consumed.remove(button);
            None
        } else {
            Some(Resolved::Tap(button))
        }
    }

    /// Fire the armed rule if its hold time has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Resolved> {
        let armed = self.armed.as_mut()?;
        if armed.fired || armed.deadline > now {
            return None;
        }
        armed.fired = true;
        let rule = self.rules[armed.rule];
        self.consumed.union(rule.buttons);
        info!("combo: {} fired", rule.action.id());
        Some(Resolved::Combo(rule.action))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.filter(|a| !a.fired).map(|a| a.deadline)
    }

    /// A hold timer is running.
    pub fn has_pending(&self) -> bool {
        self.next_deadline().is_some()
    }

    pub fn held(&self) -> ButtonSet {
        self.held
    }

    fn best_rule(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, r) in self.rules.iter().enumerate() {
            if !r.buttons.is_subset_of(self.held) {
                continue;
            }
            match best {
                Some(b) if self.rules[b].buttons.len() >= r.buttons.len() => {}
                _ => best = Some(i),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(button: ButtonId, edge: Edge, ms: u64) -> ButtonEvent {
        ButtonEvent {
            button,
            edge,
            timestamp: Instant::from_millis(ms),
        }
    }

    fn engine() -> ComboEngine {
        ComboEngine::new(&COMBO_RULES)
    }

    #[test]
    fn table_is_valid() {
        assert!(rules_are_valid(&COMBO_RULES));
    }

    #[test]
    fn duplicate_sets_are_rejected() {
        let r = COMBO_RULES[0];
        assert!(!rules_are_valid(&[r, r]));
    }

    #[test]
    fn non_member_taps_on_press() {
        let mut c = engine();
        assert_eq!(
            c.on_event(ev(ButtonId::Right, Edge::Pressed, 0)),
            Some(Resolved::Tap(ButtonId::Right))
        );
        assert_eq!(c.on_event(ev(ButtonId::Right, Edge::Released, 100)), None);
    }

    #[test]
    fn member_taps_on_release() {
        let mut c = engine();
        assert_eq!(c.on_event(ev(ButtonId::Back, Edge::Pressed, 0)), None);
        assert_eq!(
            c.on_event(ev(ButtonId::Back, Edge::Released, 120)),
            Some(Resolved::Tap(ButtonId::Back))
        );
    }

    #[test]
    fn held_combo_fires_once_and_swallows_taps() {
        let mut c = engine();
        c.on_event(ev(ButtonId::Power, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Back, Edge::Pressed, 100));
        assert_eq!(c.next_deadline(), Some(Instant::from_millis(5_100)));

        assert_eq!(c.poll(Instant::from_millis(5_099)), None);
        assert_eq!(
            c.poll(Instant::from_millis(5_100)),
            Some(Resolved::Combo(SystemAction::ClearBonds))
        );
        assert_eq!(c.poll(Instant::from_millis(9_000)), None);
        assert!(!c.has_pending());

        assert_eq!(c.on_event(ev(ButtonId::Back, Edge::Released, 9_100)), None);
        assert_eq!(c.on_event(ev(ButtonId::Power, Edge::Released, 9_200)), None);
    }

    #[test]
    fn early_release_cancels_and_resolves_as_taps() {
        let mut c = engine();
        c.on_event(ev(ButtonId::Power, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Back, Edge::Pressed, 0));
        assert_eq!(
            c.on_event(ev(ButtonId::Back, Edge::Released, 4_900)),
            Some(Resolved::Tap(ButtonId::Back))
        );
        assert!(!c.has_pending());

        // Re-press restarts the hold from scratch.
        c.on_event(ev(ButtonId::Back, Edge::Pressed, 5_000));
        assert_eq!(c.next_deadline(), Some(Instant::from_millis(10_000)));
        assert_eq!(
            c.on_event(ev(ButtonId::Back, Edge::Released, 5_200)),
            Some(Resolved::Tap(ButtonId::Back))
        );
        assert_eq!(
            c.on_event(ev(ButtonId::Power, Edge::Released, 5_300)),
            Some(Resolved::Tap(ButtonId::Power))
        );
        assert_eq!(c.poll(Instant::from_millis(20_000)), None);
    }

    #[test]
    fn larger_combo_takes_precedence() {
        let mut c = engine();
        c.on_event(ev(ButtonId::Power, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Back, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Home, Edge::Pressed, 1_000));
        assert_eq!(c.next_deadline(), Some(Instant::from_millis(11_000)));

        // The two-button rule is not separately armed.
        assert_eq!(c.poll(Instant::from_millis(6_000)), None);
        assert_eq!(
            c.poll(Instant::from_millis(11_000)),
            Some(Resolved::Combo(SystemAction::ClearConfig))
        );
    }

    #[test]
    fn releasing_from_large_combo_does_not_rearm_smaller() {
        let mut c = engine();
        c.on_event(ev(ButtonId::Power, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Back, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Home, Edge::Pressed, 0));
        assert_eq!(
            c.on_event(ev(ButtonId::Home, Edge::Released, 2_000)),
            Some(Resolved::Tap(ButtonId::Home))
        );
        assert!(!c.has_pending());
        assert_eq!(c.poll(Instant::from_millis(60_000)), None);
    }

    #[test]
    fn unrelated_press_keeps_hold_timer() {
        let mut c = engine();
        c.on_event(ev(ButtonId::Back, Edge::Pressed, 0));
        c.on_event(ev(ButtonId::Home, Edge::Pressed, 0));
        assert_eq!(
            c.on_event(ev(ButtonId::Up, Edge::Pressed, 3_000)),
            Some(Resolved::Tap(ButtonId::Up))
        );
        assert_eq!(
            c.poll(Instant::from_millis(5_000)),
            Some(Resolved::Combo(SystemAction::EnterSetup))
        );
    }
}
