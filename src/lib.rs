//! Firmware library for the Something Remote.
//!
//! Every piece of application logic lives here as plain `no_std` code so it
//! can be tested on the host; the nRF52840 binary (`main.rs`, feature
//! `embedded`) only wires hardware tasks to it.
//!
//! Usage: `cargo test` on the host, `cargo build --release --features
//! embedded,defmt --target thumbv7em-none-eabihf` for the board.

#![cfg_attr(not(test), no_std)]

// Must come first: the logging macros are used by every module below.
#[macro_use]
mod fmt;

// ═══════════════════════════════════════════════════════════════════════════
// Core
// ═══════════════════════════════════════════════════════════════════════════

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod input;

// ═══════════════════════════════════════════════════════════════════════════
// Outputs
// ═══════════════════════════════════════════════════════════════════════════

pub mod ble;
pub mod bridge;
pub mod hid;
pub mod indicator;

// ═══════════════════════════════════════════════════════════════════════════
// Power and sensors
// ═══════════════════════════════════════════════════════════════════════════

pub mod motion;
pub mod power;

// ═══════════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════════

pub mod bond_store;
pub mod settings;
pub mod storage;

// ═══════════════════════════════════════════════════════════════════════════
// Board (nRF52840 only)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(feature = "embedded")]
pub mod board;
#[cfg(feature = "embedded")]
pub mod ui;

pub use dispatcher::{BootInfo, Dispatcher, Event, Links, SystemRequest};
pub use error::Error;
