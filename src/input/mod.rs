//! Input processing: raw edge capture, debouncing and combo resolution.
//!
//! Pipeline (all but the first step run in the event loop):
//! ```text
//! GPIO IRQ ─► EventQueue ─► Debouncer ─► ComboEngine ─► Resolved
//!  RawEvent     (FIFO)      ButtonEvent      Tap / Combo
//! ```

pub mod combo;
pub mod debounce;
pub mod queue;

use embassy_time::Instant;

use crate::power::WakeSource;

/// Identity of each physical input on the Everything Remote board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ButtonId {
    Power = 0,
    Back,
    Home,
    PlayPause,
    Up,
    Left,
    Select,
    Right,
    Down,
    VolumeUp,
    Mute,
    ChannelUp,
    VolumeDown,
    Settings,
    ChannelDown,
    Shortcut3,
    Shortcut4,
    BrightnessDown,
    BrightnessUp,
    Shortcut1,
    Shortcut2,
}

impl ButtonId {
    /// Number of physical buttons.
    pub const COUNT: usize = 21;

    /// All buttons, in board order.
    pub const ALL: [ButtonId; Self::COUNT] = [
        ButtonId::Power,
        ButtonId::Back,
        ButtonId::Home,
        ButtonId::PlayPause,
        ButtonId::Up,
        ButtonId::Left,
        ButtonId::Select,
        ButtonId::Right,
        ButtonId::Down,
        ButtonId::VolumeUp,
        ButtonId::Mute,
        ButtonId::ChannelUp,
        ButtonId::VolumeDown,
        ButtonId::Settings,
        ButtonId::ChannelDown,
        ButtonId::Shortcut3,
        ButtonId::Shortcut4,
        ButtonId::BrightnessDown,
        ButtonId::BrightnessUp,
        ButtonId::Shortcut1,
        ButtonId::Shortcut2,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    /// Bit for this button in a [`ButtonSet`].
    pub const fn mask(self) -> u32 {
        1 << (self as u32)
    }

    /// Short lowercase name used in logs.
    pub const fn name(self) -> &'static str {
        match self {
            ButtonId::Power => "power",
            ButtonId::Back => "back",
            ButtonId::Home => "home",
            ButtonId::PlayPause => "play_pause",
            ButtonId::Up => "up",
            ButtonId::Left => "left",
            ButtonId::Select => "select",
            ButtonId::Right => "right",
            ButtonId::Down => "down",
            ButtonId::VolumeUp => "volume_up",
            ButtonId::Mute => "mute",
            ButtonId::ChannelUp => "channel_up",
            ButtonId::VolumeDown => "volume_down",
            ButtonId::Settings => "settings",
            ButtonId::ChannelDown => "channel_down",
            ButtonId::Shortcut3 => "shortcut_3",
            ButtonId::Shortcut4 => "shortcut_4",
            ButtonId::BrightnessDown => "brightness_down",
            ButtonId::BrightnessUp => "brightness_up",
            ButtonId::Shortcut1 => "shortcut_1",
            ButtonId::Shortcut2 => "shortcut_2",
        }
    }
}

/// Direction of a pin transition. Buttons are active-low; the GPIO layer
/// has already translated levels into press/release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Pressed,
    Released,
}

impl Edge {
    pub const fn opposite(self) -> Self {
        match self {
            Edge::Pressed => Edge::Released,
            Edge::Released => Edge::Pressed,
        }
    }

    /// Level a pin's edge tracker starts from. After a button wake the
    /// press that woke the chip may still be held; starting from released
    /// makes the first read deliver it.
    pub fn at_boot(wake_source: WakeSource, current: Edge) -> Edge {
        match wake_source {
            WakeSource::Button => Edge::Released,
            _ => current,
        }
    }
}

/// One captured pin transition, as seen by the interrupt handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawEvent {
    pub button: ButtonId,
    pub edge: Edge,
    pub timestamp: Instant,
}

/// A debounced transition. `timestamp` is when it became stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEvent {
    pub button: ButtonId,
    pub edge: Edge,
    pub timestamp: Instant,
}

/// Small bitset of buttons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonSet(u32);

impl ButtonSet {
    pub const EMPTY: Self = Self(0);

    pub const fn of(buttons: &[ButtonId]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < buttons.len() {
            bits |= buttons[i].mask();
            i += 1;
        }
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, b: ButtonId) -> bool {
        self.0 & b.mask() != 0
    }

    pub fn insert(&mut self, b: ButtonId) {
        self.0 |= b.mask();
    }

    pub fn remove(&mut self, b: ButtonId) {
        self.0 &= !b.mask();
    }

    pub fn union(&mut self, other: ButtonSet) {
        self.0 |= other.0;
    }

    pub const fn is_subset_of(self, other: ButtonSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ButtonId> {
        ButtonId::ALL.into_iter().filter(move |b| self.contains(*b))
    }
}
