//! Action mapper: resolved input → output action.
//!
//! Pure table lookup. Buttons with no binding resolve to `None`, which is
//! expected for keys reserved for system combos.

use crate::hid::consumer::ConsumerUsage;
use crate::hid::keyboard::keys;
use crate::input::combo::Resolved;
use crate::input::ButtonId;
use crate::settings::PowerButtonMode;

/// Device-level actions reachable only through combos.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemAction {
    ClearBonds,
    EnterSetup,
    ClearConfig,
}

impl SystemAction {
    pub const ALL: [SystemAction; 3] = [
        SystemAction::ClearBonds,
        SystemAction::EnterSetup,
        SystemAction::ClearConfig,
    ];

    /// Stable action id, used in broker topics and logs.
    pub const fn id(self) -> &'static str {
        match self {
            SystemAction::ClearBonds => "clear_bonds",
            SystemAction::EnterSetup => "enter_setup",
            SystemAction::ClearConfig => "clear_config",
        }
    }
}

/// A usage on one of the two HID collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidUsage {
    Keyboard(u8),
    Consumer(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    HidKey(HidUsage),
    HaTrigger(&'static str),
    Combo(SystemAction),
}

/// Static binding of a single button.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Binding {
    Key(HidUsage),
    Trigger(&'static str),
    /// Depends on the configured [`PowerButtonMode`].
    PowerButton,
    Unmapped,
}

/// Trigger id published for the power button in `HaTrigger` mode.
pub const POWER_TRIGGER: &str = "power";

const fn kb(code: u8) -> Binding {
    Binding::Key(HidUsage::Keyboard(code))
}

const fn cc(usage: ConsumerUsage) -> Binding {
    Binding::Key(HidUsage::Consumer(usage as u16))
}

pub struct ActionMap {
    bindings: [Binding; ButtonId::COUNT],
}

impl ActionMap {
    /// Default layout of the Everything Remote.
    pub const fn everything_remote() -> Self {
        let mut b = [Binding::Unmapped; ButtonId::COUNT];
        b[ButtonId::Power.index()] = Binding::PowerButton;
        b[ButtonId::Back.index()] = cc(ConsumerUsage::Back);
        b[ButtonId::Home.index()] = cc(ConsumerUsage::Home);
        b[ButtonId::PlayPause.index()] = cc(ConsumerUsage::PlayPause);
        b[ButtonId::Up.index()] = kb(keys::UP_ARROW);
        b[ButtonId::Left.index()] = kb(keys::LEFT_ARROW);
        b[ButtonId::Select.index()] = kb(keys::ENTER);
        b[ButtonId::Right.index()] = kb(keys::RIGHT_ARROW);
        b[ButtonId::Down.index()] = kb(keys::DOWN_ARROW);
        b[ButtonId::VolumeUp.index()] = cc(ConsumerUsage::VolumeUp);
        b[ButtonId::Mute.index()] = cc(ConsumerUsage::Mute);
        b[ButtonId::ChannelUp.index()] = kb(keys::PAGE_UP);
        b[ButtonId::VolumeDown.index()] = cc(ConsumerUsage::VolumeDown);
        b[ButtonId::Settings.index()] = kb(keys::F5);
        b[ButtonId::ChannelDown.index()] = kb(keys::PAGE_DOWN);
        b[ButtonId::Shortcut3.index()] = Binding::Trigger("shortcut_3");
        b[ButtonId::Shortcut4.index()] = Binding::Trigger("shortcut_4");
        b[ButtonId::BrightnessDown.index()] = Binding::Trigger("brightness_down");
        b[ButtonId::BrightnessUp.index()] = Binding::Trigger("brightness_up");
        b[ButtonId::Shortcut1.index()] = Binding::Trigger("shortcut_1");
        b[ButtonId::Shortcut2.index()] = Binding::Trigger("shortcut_2");
        Self { bindings: b }
    }

    /// Map with custom bindings (board variants, tests).
    pub const fn from_bindings(bindings: [Binding; ButtonId::COUNT]) -> Self {
        Self { bindings }
    }

    pub fn binding(&self, button: ButtonId) -> Binding {
        self.bindings[button.index()]
    }

    /// Exactly one action per tap or completed combo, or `None` when the
    /// button has no binding.
    pub fn resolve(&self, resolved: Resolved, power_mode: PowerButtonMode) -> Option<Action> {
        match resolved {
            Resolved::Combo(sys) => Some(Action::Combo(sys)),
            Resolved::Tap(button) => match self.binding(button) {
                Binding::Key(usage) => Some(Action::HidKey(usage)),
                Binding::Trigger(id) => Some(Action::HaTrigger(id)),
                Binding::PowerButton => Some(match power_mode {
                    PowerButtonMode::BleKey => {
                        Action::HidKey(HidUsage::Consumer(ConsumerUsage::Power as u16))
                    }
                    PowerButtonMode::HaTrigger => Action::HaTrigger(POWER_TRIGGER),
                }),
                Binding::Unmapped => None,
            },
        }
    }

    /// Every action id that can be published to the broker, in table order:
    /// button triggers, the power trigger, then the system combos.
    pub fn trigger_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        let buttons = self.bindings.iter().filter_map(|b| match b {
            Binding::Trigger(id) => Some(*id),
            Binding::PowerButton => Some(POWER_TRIGGER),
            _ => None,
        });
        buttons.chain(SystemAction::ALL.iter().map(|s| s.id()))
    }
}

impl Default for ActionMap {
    fn default() -> Self {
        Self::everything_remote()
    }
}
