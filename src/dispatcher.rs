//! Event dispatcher: the single coordination point.
//!
//! Interrupts and radio/broker tasks only enqueue. Everything else happens
//! here, one event at a time, on the main loop:
//!
//! ```text
//!  EventQueue ─► Debouncer ─► ComboEngine ─► ActionMap ─┬─► HidSession ─► HidLink
//!                                                        └─► AutomationBridge ─► BrokerLink
//!  BleEvent / BrokerEvent / motion / battery / config ─────► (component) ─► PowerManager
//! ```
//!
//! Components never hold references to each other; the dispatcher passes
//! each one what it needs. Persistence is split off into [`Dispatcher::persist`]
//! so the synchronous core never waits on flash.

use embassy_time::Instant;
use embedded_storage_async::nor_flash::NorFlash;
use heapless::Deque;

use crate::action::{Action, ActionMap, SystemAction};
use crate::ble::session::{HidSession, SessionState};
use crate::ble::{BleEvent, HidLink};
use crate::bond_store::BondStore;
use crate::bridge::discovery::DeviceId;
use crate::bridge::{AutomationBridge, BridgeState, BrokerEvent, BrokerLink};
use crate::config::{BUTTON_DEBOUNCE_MS, INPUT_QUEUE_DEPTH};
use crate::error::StorageError;
use crate::indicator::{Indicator, IndicatorState, StatusIndicator};
use crate::input::combo::{ComboEngine, Resolved, COMBO_RULES};
use crate::input::debounce::Debouncer;
use crate::input::queue::EventQueue;
use crate::input::ButtonEvent;
use crate::power::{battery_percent, PowerManager, PowerState, WakePins, WakeReason, WakeSource};
use crate::settings::{Config, ConfigStore};

/// Everything the main loop can be woken for.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Raw edges are waiting in the input queue.
    Input,
    Ble(BleEvent),
    Broker(BrokerEvent),
    /// Motion-sensor interrupt.
    Motion,
    /// The motion sensor stopped answering.
    MotionSensorFault,
    Battery { millivolts: u16 },
    /// New config from the setup portal.
    ConfigUpdated(Config),
    /// A deadline from [`Dispatcher::next_deadline`] passed.
    Tick,
}

/// Things only the board can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemRequest {
    OpenSetupPortal,
    /// Flush the stores, arm these pins and enter System OFF.
    DeepSleep(WakePins),
    /// Storage can no longer reach a known state; wipe and reboot.
    FactoryReset,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    pub input_overflows: u32,
    pub keys_sent: u32,
    pub keys_dropped: u32,
    pub pairing_failures: u32,
    pub triggers_published: u32,
    pub triggers_dropped: u32,
    pub broker_reconnects: u32,
    pub discovery_publications: u32,
}

/// Facts established before the loop starts.
#[derive(Clone, Debug)]
pub struct BootInfo {
    pub device_id: DeviceId,
    pub wake_source: WakeSource,
    /// Result of the one-time motion-sensor probe.
    pub sensor_present: bool,
}

/// Output collaborators.
pub struct Links<H, B, L> {
    pub hid: H,
    pub broker: B,
    pub indicator: L,
}

pub struct Dispatcher<'q, H, B, L> {
    queue: &'q EventQueue<INPUT_QUEUE_DEPTH>,
    debouncer: Debouncer,
    combos: ComboEngine,
    actions: ActionMap,
    session: HidSession,
    bonds: BondStore,
    config: ConfigStore,
    bridge: AutomationBridge,
    power: PowerManager,
    indicator: Indicator,
    links: Links<H, B, L>,
    wake_source: WakeSource,
    requests: Deque<SystemRequest, 4>,
}

impl<'q, H, B, L> Dispatcher<'q, H, B, L>
where
    H: HidLink,
    B: BrokerLink,
    L: StatusIndicator,
{
    /// `bonds` and `config` must already be loaded from flash.
    pub fn new(
        queue: &'q EventQueue<INPUT_QUEUE_DEPTH>,
        links: Links<H, B, L>,
        bonds: BondStore,
        config: ConfigStore,
        boot: BootInfo,
        now: Instant,
    ) -> Self {
        Self {
            queue,
            debouncer: Debouncer::new(embassy_time::Duration::from_millis(BUTTON_DEBOUNCE_MS)),
            combos: ComboEngine::new(&COMBO_RULES),
            actions: ActionMap::everything_remote(),
            session: HidSession::new(),
            bonds,
            config,
            bridge: AutomationBridge::new(boot.device_id),
            power: PowerManager::new(now, boot.wake_source, boot.sensor_present),
            indicator: Indicator::new(),
            links,
            wake_source: boot.wake_source,
            requests: Deque::new(),
        }
    }

    /// Start advertising and, if configured, the bridge. A cold boot
    /// without a usable config asks for the setup portal.
    pub fn boot(&mut self, now: Instant) {
        self.links.indicator.show(IndicatorState::Initializing);
        self.session.start(&self.bonds, &mut self.links.hid);
        self.update_indicator();

        match self.config.usable() {
            Some(config) => {
                self.bridge
                    .start(config, &self.actions, now, &mut self.links.broker);
            }
            None if self.wake_source == WakeSource::None => {
                info!("Dispatcher: not configured, requesting setup portal");
                self.request(SystemRequest::OpenSetupPortal);
            }
            None => info!("Dispatcher: not configured, BLE only"),
        }
    }

    pub fn handle(&mut self, event: Event, now: Instant) {
        match event {
            Event::Input => self.drain_input(),
            Event::Ble(ev) => self.on_ble(ev, now),
            Event::Broker(ev) => {
                self.bridge.on_event(ev, now, &mut self.links.broker);
            }
            Event::Motion => self.wake(WakeReason::Motion, now),
            Event::MotionSensorFault => self.power.sensor_failed(),
            Event::Battery { millivolts } => {
                let percent = battery_percent(millivolts);
                debug!("Battery: {} mV ({}%)", millivolts, percent);
                self.bridge
                    .publish_battery(percent, millivolts, now, &mut self.links.broker);
            }
            Event::ConfigUpdated(config) => {
                self.bridge
                    .start(&config, &self.actions, now, &mut self.links.broker);
                self.config.store(config);
            }
            Event::Tick => {}
        }
        self.poll(now);
    }

    /// Run every timer that is due.
    pub fn poll(&mut self, now: Instant) {
        for ev in self.debouncer.poll(now) {
            self.on_button(ev);
        }
        if let Some(resolved) = self.combos.poll(now) {
            self.dispatch(resolved, now);
        }
        self.bridge.poll(now, &mut self.links.broker);
        self.indicator.poll(now, &mut self.links.indicator);

        let busy = self.debouncer.has_pending() || self.combos.has_pending();
        if let Some(state) = self.power.tick(now, busy) {
            self.apply_power(state);
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.debouncer.next_deadline(),
            self.combos.next_deadline(),
            self.bridge.next_deadline(),
            self.indicator.next_deadline(),
            self.power.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn take_request(&mut self) -> Option<SystemRequest> {
        self.requests.pop_front()
    }

    fn request(&mut self, req: SystemRequest) {
        if self.requests.iter().any(|r| *r == req) {
            return;
        }
        if self.requests.push_back(req).is_err() {
            warn!("Dispatcher: request {:?} dropped", req);
        }
    }

    /// Flush dirty stores. Call between events.
    pub async fn persist<F: NorFlash>(&mut self, flash: &mut F) {
        if self.bonds.is_dirty() {
            let r = self.bonds.save_to_flash(flash).await;
            self.on_persist_result(r);
        }
        if self.config.is_dirty() {
            let r = self.config.save_to_flash(flash).await;
            self.on_persist_result(r);
        }
    }

    fn on_persist_result(&mut self, result: Result<(), StorageError>) {
        match result {
            Ok(()) => {}
            Err(StorageError::Unrecoverable) => {
                error!("Dispatcher: storage unrecoverable, factory reset");
                self.indicator.set(IndicatorState::Error, &mut self.links.indicator);
                self.request(SystemRequest::FactoryReset);
            }
            // Stays dirty, retried after the next event.
            Err(e) => warn!("Dispatcher: persist failed: {:?}", e),
        }
    }

    /// Drop bond and config in RAM, ready to be persisted before reboot.
    pub fn factory_reset(&mut self) {
        warn!("Dispatcher: factory reset");
        self.bridge.stop(&mut self.links.broker);
        self.config.clear();
        self.session.clear_bonds(&mut self.bonds, &mut self.links.hid);
    }

    fn drain_input(&mut self) {
        while let Some(raw) = self.queue.pop() {
            for ev in self.debouncer.feed(raw) {
                self.on_button(ev);
            }
        }
    }

    fn on_button(&mut self, ev: ButtonEvent) {
        trace!("Input: {} {:?}", ev.button.name(), ev.edge);
        self.wake(WakeReason::Button, ev.timestamp);
        if let Some(resolved) = self.combos.on_event(ev) {
            self.dispatch(resolved, ev.timestamp);
        }
    }

    fn dispatch(&mut self, resolved: Resolved, now: Instant) {
        let mode = self.config.power_button_mode();
        let Some(action) = self.actions.resolve(resolved, mode) else {
            debug!("Dispatcher: {:?} unmapped", resolved);
            return;
        };
        match action {
            Action::HidKey(usage) => {
                if self.session.send_key(usage, &mut self.links.hid) {
                    self.indicator.flash_key(now, &mut self.links.indicator);
                }
            }
            Action::HaTrigger(_) => {
                self.bridge.publish_action(&action, &mut self.links.broker);
            }
            Action::Combo(sys) => {
                self.bridge.publish_action(&action, &mut self.links.broker);
                self.run_system_action(sys);
            }
        }
    }

    fn run_system_action(&mut self, action: SystemAction) {
        info!("Dispatcher: {}", action.id());
        match action {
            SystemAction::ClearBonds => {
                self.session.clear_bonds(&mut self.bonds, &mut self.links.hid);
                self.update_indicator();
            }
            SystemAction::EnterSetup => self.request(SystemRequest::OpenSetupPortal),
            SystemAction::ClearConfig => {
                self.config.clear();
                self.bridge.stop(&mut self.links.broker);
                self.request(SystemRequest::OpenSetupPortal);
            }
        }
    }

    fn on_ble(&mut self, ev: BleEvent, now: Instant) {
        let changed = self.session.on_event(ev, &mut self.bonds, &mut self.links.hid);
        if matches!(
            ev,
            BleEvent::Connected { .. } | BleEvent::Secured { .. } | BleEvent::Bonded(_)
        ) {
            self.wake(WakeReason::BleActivity, now);
        }
        if changed.is_some() && self.power.state() == PowerState::Active {
            self.update_indicator();
        }
    }

    fn wake(&mut self, reason: WakeReason, now: Instant) {
        if let Some(state) = self.power.wake(reason, now) {
            self.apply_power(state);
        }
    }

    fn apply_power(&mut self, state: PowerState) {
        match state {
            PowerState::Active => {
                self.links.hid.set_low_power(false);
                self.update_indicator();
            }
            PowerState::Idle => {}
            PowerState::LightSleep => {
                self.links.hid.set_low_power(true);
                self.indicator.set(IndicatorState::Off, &mut self.links.indicator);
            }
            PowerState::DeepSleep => {
                self.bridge.stop(&mut self.links.broker);
                self.indicator.set(IndicatorState::Off, &mut self.links.indicator);
                self.request(SystemRequest::DeepSleep(self.power.deep_sleep_wake_pins()));
            }
        }
    }

    fn update_indicator(&mut self) {
        let state = IndicatorState::for_session(self.session.state());
        self.indicator.set(state, &mut self.links.indicator);
    }

    pub fn stats(&self) -> Stats {
        let s = self.session.stats();
        let b = self.bridge.stats();
        Stats {
            input_overflows: self.queue.overflow_count(),
            keys_sent: s.keys_sent,
            keys_dropped: s.keys_dropped,
            pairing_failures: s.pairing_failures,
            triggers_published: b.triggers_published,
            triggers_dropped: b.triggers_dropped,
            broker_reconnects: b.reconnects,
            discovery_publications: b.discovery_publications,
        }
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn bonds(&self) -> &BondStore {
        &self.bonds
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn links(&self) -> &Links<H, B, L> {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut Links<H, B, L> {
        &mut self.links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::session::tests::{Cmd, MockLink};
    use crate::ble::AdvertiseMode;
    use crate::bond_store::tests::bond;
    use crate::bond_store::PeerAddress;
    use crate::bridge::client::tests::{config, Call, MockBroker};
    use crate::bridge::discovery::device_id;
    use crate::hid::press_pair;
    use crate::action::HidUsage;
    use crate::indicator::tests::Recorder;
    use crate::input::{ButtonId, Edge};
    use crate::storage::mock::{self, Faulty, PAGE};
    use embassy_futures::block_on;
    use std::string::String;

    type TestDispatcher<'q> = Dispatcher<'q, MockLink, MockBroker, Recorder>;

    const PEER: PeerAddress = PeerAddress {
        kind: 0,
        bytes: [9, 8, 7, 6, 5, 4],
    };
    const CONFIG_BASE: u32 = 2 * PAGE as u32;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn dispatcher<'q>(
        queue: &'q EventQueue<INPUT_QUEUE_DEPTH>,
        cfg: Option<Config>,
        wake_source: WakeSource,
    ) -> TestDispatcher<'q> {
        let mut store = ConfigStore::at(CONFIG_BASE);
        if let Some(c) = cfg {
            store.store(c);
        }
        let mut d = Dispatcher::new(
            queue,
            Links {
                hid: MockLink::default(),
                broker: MockBroker::default(),
                indicator: Recorder::default(),
            },
            BondStore::at(0),
            store,
            BootInfo {
                device_id: device_id(0xC0FFEE),
                wake_source,
                sensor_present: true,
            },
            at(0),
        );
        d.boot(at(0));
        d
    }

    fn pair(d: &mut TestDispatcher<'_>, now: u64) {
        d.handle(Event::Ble(BleEvent::Connected { peer: PEER }), at(now));
        d.handle(Event::Ble(BleEvent::Bonded(bond(3))), at(now));
        d.links_mut().hid.cmds.clear();
    }

    fn press(d: &mut TestDispatcher<'_>, queue: &EventQueue<INPUT_QUEUE_DEPTH>, b: ButtonId, ms: u64) {
        queue.on_pin_transition(b, Edge::Pressed, at(ms));
        d.handle(Event::Input, at(ms));
    }

    fn release(d: &mut TestDispatcher<'_>, queue: &EventQueue<INPUT_QUEUE_DEPTH>, b: ButtonId, ms: u64) {
        queue.on_pin_transition(b, Edge::Released, at(ms));
        d.handle(Event::Input, at(ms));
    }

    fn sent(d: &TestDispatcher<'_>) -> std::vec::Vec<[crate::hid::HidReport; 2]> {
        d.links()
            .hid
            .cmds
            .iter()
            .filter_map(|c| match c {
                Cmd::Send(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn cold_boot_without_config_requests_portal() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::None);
        assert_eq!(d.take_request(), Some(SystemRequest::OpenSetupPortal));
        assert_eq!(d.take_request(), None);
        assert_eq!(d.session_state(), SessionState::Advertising);
        assert_eq!(d.bridge_state(), BridgeState::Disconnected);
    }

    #[test]
    fn wake_from_sleep_skips_portal() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        assert_eq!(d.take_request(), None);
    }

    #[test]
    fn configured_boot_starts_bridge() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, Some(config()), WakeSource::None);
        assert_eq!(d.take_request(), None);
        assert_eq!(d.bridge_state(), BridgeState::Connecting);
        assert_eq!(d.links().broker.calls, [Call::Connect]);
    }

    #[test]
    fn right_arrow_sends_one_report_pair_after_debounce() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        pair(&mut d, 0);

        press(&mut d, &queue, ButtonId::Right, 1_000);
        assert!(sent(&d).is_empty());
        assert_eq!(d.next_deadline(), Some(at(1_030)));
        d.poll(at(1_030));
        assert_eq!(sent(&d), [press_pair(HidUsage::Keyboard(0x4F))]);

        release(&mut d, &queue, ButtonId::Right, 1_120);
        d.poll(at(1_150));
        assert_eq!(sent(&d).len(), 1);
        assert_eq!(d.stats().keys_sent, 1);
    }

    #[test]
    fn bounce_inside_window_is_one_press() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        pair(&mut d, 0);
        for (i, edge) in [Edge::Pressed, Edge::Released, Edge::Pressed]
            .into_iter()
            .enumerate()
        {
            queue.on_pin_transition(ButtonId::Up, edge, at(500 + i as u64 * 5));
        }
        d.handle(Event::Input, at(510));
        d.poll(at(600));
        assert_eq!(sent(&d), [press_pair(HidUsage::Keyboard(0x52))]);
    }

    #[test]
    fn key_flashes_indicator() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        pair(&mut d, 0);
        d.links_mut().indicator.0.clear();
        press(&mut d, &queue, ButtonId::Select, 100);
        d.poll(at(130));
        d.poll(at(210));
        assert_eq!(
            d.links().indicator.0,
            [IndicatorState::KeySent, IndicatorState::Connected]
        );
    }

    #[test]
    fn clear_bonds_combo_fires_once_and_swallows_taps() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        pair(&mut d, 0);

        press(&mut d, &queue, ButtonId::Power, 0);
        press(&mut d, &queue, ButtonId::Back, 10);
        d.poll(at(40));
        // Armed at the confirmed Back press (t=40).
        assert_eq!(d.next_deadline(), Some(at(5_040)));
        d.poll(at(5_040));
        assert!(!d.bonds().has_bond());
        assert_eq!(d.session_state(), SessionState::Advertising);
        d.poll(at(9_000));

        release(&mut d, &queue, ButtonId::Back, 9_000);
        release(&mut d, &queue, ButtonId::Power, 9_010);
        d.poll(at(9_100));
        assert!(sent(&d).is_empty());
        assert_eq!(
            d.links()
                .hid
                .cmds
                .iter()
                .filter(|c| **c == Cmd::Forget)
                .count(),
            1
        );
        assert!(d
            .links()
            .hid
            .cmds
            .contains(&Cmd::Advertise(AdvertiseMode::Pairable)));
    }

    #[test]
    fn early_release_resolves_as_taps() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        pair(&mut d, 0);

        press(&mut d, &queue, ButtonId::Power, 0);
        press(&mut d, &queue, ButtonId::Back, 10);
        release(&mut d, &queue, ButtonId::Back, 4_900);
        d.poll(at(4_930));
        press(&mut d, &queue, ButtonId::Back, 5_000);
        d.poll(at(5_030));
        release(&mut d, &queue, ButtonId::Back, 5_100);
        release(&mut d, &queue, ButtonId::Power, 5_200);
        d.poll(at(5_300));
        d.poll(at(20_000));

        assert!(d.bonds().has_bond());
        assert_eq!(
            sent(&d),
            [
                press_pair(HidUsage::Consumer(0x224)),
                press_pair(HidUsage::Consumer(0x224)),
                press_pair(HidUsage::Consumer(0x30)),
            ]
        );
    }

    #[test]
    fn combo_is_published_when_connected() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, Some(config()), WakeSource::None);
        d.handle(Event::Broker(BrokerEvent::Connected), at(0));
        d.links_mut().broker.calls.clear();

        press(&mut d, &queue, ButtonId::Back, 0);
        press(&mut d, &queue, ButtonId::Home, 0);
        d.poll(at(5_030));
        assert_eq!(d.take_request(), Some(SystemRequest::OpenSetupPortal));
        assert_eq!(
            d.links().broker.published(),
            [(
                String::from("something_remote_c0ffee/action/enter_setup"),
                String::from("enter_setup")
            )]
        );
    }

    #[test]
    fn clear_config_stops_bridge_and_opens_portal() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, Some(config()), WakeSource::None);
        d.handle(Event::Broker(BrokerEvent::Connected), at(0));

        press(&mut d, &queue, ButtonId::Power, 0);
        press(&mut d, &queue, ButtonId::Back, 0);
        press(&mut d, &queue, ButtonId::Home, 0);
        // The larger combo owns the hold; the 5 s pair rules never fire.
        d.poll(at(5_030));
        assert!(d.take_request().is_none());
        d.poll(at(10_030));
        assert_eq!(d.take_request(), Some(SystemRequest::OpenSetupPortal));
        assert!(!d.config().is_configured());
        assert_eq!(d.bridge_state(), BridgeState::Disconnected);
        assert_eq!(d.next_deadline().map(|t| t > at(10_030)), Some(true));
    }

    #[test]
    fn trigger_buttons_publish() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, Some(config()), WakeSource::None);
        d.handle(Event::Broker(BrokerEvent::Connected), at(0));
        press(&mut d, &queue, ButtonId::Shortcut1, 100);
        d.poll(at(130));
        assert_eq!(d.stats().triggers_published, 1);
        assert!(sent(&d).is_empty());
    }

    #[test]
    fn power_button_mode_from_config() {
        let queue = EventQueue::new();
        let mut cfg = config();
        cfg.set_field("power_mode", "ha").unwrap();
        let mut d = dispatcher(&queue, Some(cfg), WakeSource::None);
        d.handle(Event::Broker(BrokerEvent::Connected), at(0));
        pair(&mut d, 0);

        press(&mut d, &queue, ButtonId::Power, 100);
        release(&mut d, &queue, ButtonId::Power, 200);
        d.poll(at(300));
        assert!(sent(&d).is_empty());
        assert_eq!(d.stats().triggers_published, 1);
    }

    #[test]
    fn idle_to_light_sleep_to_deep_sleep() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        d.poll(at(5 * 60 * 1000));
        assert_eq!(d.power_state(), PowerState::LightSleep);
        assert!(d.links().hid.cmds.contains(&Cmd::LowPower(true)));

        d.poll(at(65 * 60 * 1000));
        assert_eq!(d.power_state(), PowerState::DeepSleep);
        match d.take_request() {
            Some(SystemRequest::DeepSleep(pins)) => assert!(pins.motion),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn button_wakes_from_light_sleep() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        d.poll(at(300_000));
        press(&mut d, &queue, ButtonId::Up, 301_000);
        d.poll(at(301_030));
        assert_eq!(d.power_state(), PowerState::Active);
        assert_eq!(d.links().hid.cmds.last(), Some(&Cmd::LowPower(false)));
    }

    #[test]
    fn pending_combo_keeps_device_active() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        d.poll(at(295_000));
        press(&mut d, &queue, ButtonId::Power, 295_000);
        press(&mut d, &queue, ButtonId::Back, 295_000);
        d.poll(at(295_030));
        d.poll(at(299_000));
        d.poll(at(300_000));
        assert_eq!(d.power_state(), PowerState::Active);
    }

    #[test]
    fn motion_wakes_and_sensor_fault_disables_it() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Motion);
        d.poll(at(300_000));
        d.handle(Event::Motion, at(300_100));
        assert_eq!(d.power_state(), PowerState::Active);

        d.handle(Event::MotionSensorFault, at(300_200));
        d.poll(at(600_200));
        d.handle(Event::Motion, at(600_300));
        assert_eq!(d.power_state(), PowerState::LightSleep);
    }

    #[test]
    fn pairing_is_persisted() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        pair(&mut d, 0);
        let mut flash = mock::flash();
        block_on(d.persist(&mut flash));
        assert!(!d.bonds().is_dirty());

        let mut reloaded = BondStore::at(0);
        block_on(reloaded.load_from_flash(&mut flash));
        assert_eq!(reloaded.get(), Some(&bond(3)));
    }

    #[test]
    fn config_update_is_stored_and_starts_bridge() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        d.handle(Event::ConfigUpdated(config()), at(10));
        assert!(d.config().is_configured());
        assert!(d.config().is_dirty());
        assert_eq!(d.bridge_state(), BridgeState::Connecting);

        let mut flash = mock::flash();
        block_on(d.persist(&mut flash));
        let mut reloaded = ConfigStore::at(CONFIG_BASE);
        block_on(reloaded.load_from_flash(&mut flash));
        assert_eq!(reloaded.usable(), Some(&config()));
    }

    #[test]
    fn unrecoverable_storage_requests_factory_reset() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, None, WakeSource::Button);
        d.factory_reset();
        let mut flash = Faulty::dead();
        block_on(d.persist(&mut flash));
        assert_eq!(d.take_request(), Some(SystemRequest::FactoryReset));
        assert_eq!(d.take_request(), None);
    }

    #[test]
    fn battery_reported_only_when_connected() {
        let queue = EventQueue::new();
        let mut d = dispatcher(&queue, Some(config()), WakeSource::None);
        d.handle(Event::Battery { millivolts: 3_750 }, at(0));
        assert!(d.links().broker.published().is_empty());
        d.handle(Event::Broker(BrokerEvent::Connected), at(10));
        d.handle(Event::Battery { millivolts: 3_750 }, at(20));
        assert_eq!(
            d.links().broker.published(),
            [(
                String::from("something_remote_c0ffee/battery"),
                String::from("{\"percent\":50,\"voltage\":3.75}")
            )]
        );
    }

    #[test]
    fn overflow_is_counted() {
        let queue = EventQueue::new();
        let d = dispatcher(&queue, None, WakeSource::Button);
        for i in 0..(INPUT_QUEUE_DEPTH as u64 + 3) {
            queue.on_pin_transition(ButtonId::Up, Edge::Pressed, at(i));
        }
        assert_eq!(d.stats().input_overflows, 3);
    }
}
