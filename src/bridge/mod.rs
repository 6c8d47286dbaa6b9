//! Home-automation bridge: broker connectivity, discovery and trigger
//! publication.
//!
//! The MQTT/WiFi transport itself lives on a network co-processor and is
//! reached through [`BrokerLink`]. Everything here is non-blocking: link
//! calls enqueue and return, outcomes come back as [`BrokerEvent`]s.

pub mod backoff;
pub mod client;
pub mod discovery;
pub mod wire;

#[cfg(feature = "embedded")]
pub mod uart_link;

pub use client::{AutomationBridge, BridgeState, BridgeStats};

use crate::error::LinkError;
use crate::settings::Config;

/// Outcomes reported by the broker transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BrokerEvent {
    /// Session established (CONNACK received).
    Connected,
    /// WiFi or broker connection attempt failed.
    ConnectFailed,
    /// Established session dropped.
    Disconnected,
    /// Keep-alive answered.
    PingResponse,
}

/// Commands the bridge issues to the transport.
pub trait BrokerLink {
    /// Start connecting (WiFi, then broker). Completion is a [`BrokerEvent`].
    fn connect(&mut self, config: &Config, client_id: &str);

    /// Queue a publish. QoS 0, fire-and-forget.
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), LinkError>;

    fn ping(&mut self);

    fn disconnect(&mut self);
}
