//! Broker session state machine.
//!
//! ```text
//!  Disconnected ──retry timer──► Connecting ──Connected──► Connected
//!       ▲                            │ ConnectFailed / timeout  │
//!       └────────── backoff ◄────────┴──────────────────────────┘
//!                                    Disconnected / session timeout
//! ```
//!
//! Connectivity loss is never fatal; retries go on forever with capped
//! exponential backoff. Triggers raised while not connected are dropped.

use embassy_time::Instant;

use super::backoff::Backoff;
use super::discovery::{self, DeviceId, DiscoverySet};
use super::{BrokerEvent, BrokerLink};
use crate::action::{Action, ActionMap};
use crate::config::{
    BATTERY_REPORT_INTERVAL, BROKER_BACKOFF_INITIAL, BROKER_BACKOFF_MAX, BROKER_CONNECT_TIMEOUT,
    BROKER_PING_INTERVAL, BROKER_SESSION_TIMEOUT,
};
use crate::settings::Config;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeStats {
    pub triggers_published: u32,
    pub triggers_dropped: u32,
    pub reconnects: u32,
    pub connect_failures: u32,
    pub discovery_publications: u32,
}

pub struct AutomationBridge {
    state: BridgeState,
    device_id: DeviceId,
    /// Present while the bridge is started with a usable config.
    config: Option<Config>,
    discovery: Option<DiscoverySet>,
    backoff: Backoff,
    retry_at: Option<Instant>,
    connect_deadline: Option<Instant>,
    next_ping: Option<Instant>,
    last_rx: Instant,
    last_battery: Option<Instant>,
    ever_connected: bool,
    stats: BridgeStats,
}

impl AutomationBridge {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            state: BridgeState::Disconnected,
            device_id,
            config: None,
            discovery: None,
            backoff: Backoff::new(BROKER_BACKOFF_INITIAL, BROKER_BACKOFF_MAX),
            retry_at: None,
            connect_deadline: None,
            next_ping: None,
            last_rx: Instant::from_ticks(0),
            last_battery: None,
            ever_connected: false,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.state == BridgeState::Connected
    }

    /// Started with a usable config.
    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    pub fn discovery(&self) -> Option<&DiscoverySet> {
        self.discovery.as_ref()
    }

    fn set_state(&mut self, next: BridgeState) {
        if self.state != next {
            info!("Bridge: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Start (or restart) with `config`. An incomplete config leaves the
    /// bridge stopped; BLE keeps working without it.
    pub fn start(
        &mut self,
        config: &Config,
        actions: &ActionMap,
        now: Instant,
        link: &mut impl BrokerLink,
    ) {
        self.stop(link);
        if !config.is_configured() {
            warn!("Bridge: not configured, staying offline");
            return;
        }
        match DiscoverySet::build(&self.device_id, config.device_name(), actions) {
            Ok(set) => self.discovery = Some(set),
            Err(e) => {
                error!("Bridge: discovery set does not fit: {:?}", e);
                self.discovery = None;
            }
        }
        self.config = Some(config.clone());
        self.backoff.reset();
        self.connect(now, link);
    }

    /// Disconnect and cancel any pending retry.
    pub fn stop(&mut self, link: &mut impl BrokerLink) {
        if self.state != BridgeState::Disconnected {
            link.disconnect();
        }
        self.config = None;
        self.retry_at = None;
        self.connect_deadline = None;
        self.next_ping = None;
        self.set_state(BridgeState::Disconnected);
    }

    fn connect(&mut self, now: Instant, link: &mut impl BrokerLink) {
        let Some(config) = &self.config else {
            return;
        };
        link.connect(config, &self.device_id);
        self.retry_at = None;
        self.connect_deadline = Some(now + BROKER_CONNECT_TIMEOUT);
        self.set_state(BridgeState::Connecting);
    }

    fn schedule_retry(&mut self, now: Instant) {
        let delay = self.backoff.next_delay();
        info!("Bridge: retry in {} ms", delay.as_millis());
        self.retry_at = Some(now + delay);
        self.connect_deadline = None;
        self.next_ping = None;
        self.set_state(BridgeState::Disconnected);
    }

    /// Drive timers: retries, connect timeout, keep-alive.
    pub fn poll(&mut self, now: Instant, link: &mut impl BrokerLink) {
        match self.state {
            BridgeState::Disconnected => {
                if self.retry_at.is_some_and(|t| t <= now) {
                    self.connect(now, link);
                }
            }
            BridgeState::Connecting => {
                if self.connect_deadline.is_some_and(|t| t <= now) {
                    warn!("Bridge: connect timed out");
                    self.stats.connect_failures += 1;
                    link.disconnect();
                    self.schedule_retry(now);
                }
            }
            BridgeState::Connected => {
                if now >= self.last_rx + BROKER_SESSION_TIMEOUT {
                    warn!("Bridge: session timed out");
                    link.disconnect();
                    self.schedule_retry(now);
                } else if self.next_ping.is_some_and(|t| t <= now) {
                    link.ping();
                    self.next_ping = Some(now + BROKER_PING_INTERVAL);
                }
            }
        }
    }

    pub fn on_event(&mut self, event: BrokerEvent, now: Instant, link: &mut impl BrokerLink) {
        match event {
            BrokerEvent::Connected => {
                if self.state != BridgeState::Connecting {
                    return;
                }
                self.set_state(BridgeState::Connected);
                self.backoff.reset();
                self.connect_deadline = None;
                self.last_rx = now;
                self.next_ping = Some(now + BROKER_PING_INTERVAL);
                if self.ever_connected {
                    self.stats.reconnects += 1;
                }
                self.ever_connected = true;
                self.publish_discovery(link);
            }
            BrokerEvent::ConnectFailed => {
                if self.state == BridgeState::Connecting {
                    self.stats.connect_failures += 1;
                    self.schedule_retry(now);
                }
            }
            BrokerEvent::Disconnected => {
                if self.state != BridgeState::Disconnected {
                    self.schedule_retry(now);
                }
            }
            BrokerEvent::PingResponse => self.last_rx = now,
        }
    }

    fn publish_discovery(&mut self, link: &mut impl BrokerLink) {
        let Some(set) = &self.discovery else {
            return;
        };
        let mut failed = 0u32;
        for entry in set.entries() {
            if link.publish(&entry.topic, &entry.payload, true).is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("Bridge: {} discovery messages not queued", failed);
        }
        self.stats.discovery_publications += 1;
        info!("Bridge: discovery published ({} entries)", set.len());
    }

    /// Publish a momentary trigger. At most once; dropped if not connected.
    pub fn publish_action(&mut self, action: &Action, link: &mut impl BrokerLink) -> bool {
        let id = match action {
            Action::HaTrigger(id) => *id,
            Action::Combo(sys) => sys.id(),
            Action::HidKey(_) => return false,
        };
        if self.state != BridgeState::Connected {
            self.stats.triggers_dropped += 1;
            warn!("Bridge: trigger {} dropped ({:?})", id, self.state);
            return false;
        }
        let Ok(topic) = discovery::trigger_topic(&self.device_id, id) else {
            self.stats.triggers_dropped += 1;
            return false;
        };
        match link.publish(&topic, id, false) {
            Ok(()) => {
                self.stats.triggers_published += 1;
                debug!("Bridge: trigger {}", id);
                true
            }
            Err(e) => {
                self.stats.triggers_dropped += 1;
                warn!("Bridge: trigger {} dropped: {:?}", id, e);
                false
            }
        }
    }

    /// Publish battery state if connected and the report interval elapsed.
    /// Never connects just for this.
    pub fn publish_battery(
        &mut self,
        percent: u8,
        millivolts: u16,
        now: Instant,
        link: &mut impl BrokerLink,
    ) -> bool {
        if self.state != BridgeState::Connected {
            return false;
        }
        if self
            .last_battery
            .is_some_and(|t| now < t + BATTERY_REPORT_INTERVAL)
        {
            return false;
        }
        let Ok(topic) = discovery::battery_topic(&self.device_id) else {
            return false;
        };
        let Ok(payload) = discovery::battery_payload(percent, millivolts) else {
            return false;
        };
        if link.publish(&topic, &payload, false).is_ok() {
            self.last_battery = Some(now);
            true
        } else {
            false
        }
    }

    /// Next instant at which [`poll`](Self::poll) has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            BridgeState::Disconnected => self.retry_at,
            BridgeState::Connecting => self.connect_deadline,
            BridgeState::Connected => {
                let timeout = self.last_rx + BROKER_SESSION_TIMEOUT;
                Some(self.next_ping.map_or(timeout, |p| p.min(timeout)))
            }
        }
    }
}
