//! Physical user interface: the 21 buttons in, the tri-colour LED out.
//!
//! ## Components
//!
//! - **Buttons**: active-low switches with internal pull-ups, one GPIO edge
//!   task each. Debouncing happens in the event loop, not here.
//! - **LED**: three push-pull GPIOs, one per colour.

pub mod buttons;
pub mod led;
