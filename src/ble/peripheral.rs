//! SoftDevice peripheral: HID-over-GATT server, advertising and bonding.
//!
//! The radio task owns the SoftDevice connection. The event loop talks to it
//! only through two channels: [`HidCommand`]s in (via [`ChannelHidLink`])
//! and [`BleEvent`]s out. Nothing here blocks the loop.
//!
//! GATT layout:
//! - HID (0x1812): information, report map, control point, protocol mode,
//!   keyboard input/output reports (ID 1), consumer input report (ID 2)
//! - Device Information (0x180A): manufacturer, model, firmware, PnP ID
//! - Battery (0x180F): level, notify

use core::cell::Cell;

use embassy_futures::select::{select, select4, Either, Either4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use nrf_softdevice::ble::advertisement_builder::{
    AdvertisementDataType, Flag, LegacyAdvertisementBuilder, LegacyAdvertisementPayload,
    ServiceList, ServiceUuid16,
};
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, RegisterError, WriteOp};
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    peripheral, Address, Connection, EncryptionInfo, IdentityKey, MasterId,
    SecurityMode, Uuid,
};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;

use super::{AdvertiseMode, BleEvent, HidLink, SecurityMailbox};
use crate::bond_store::{BondRecord, PeerAddress};
use crate::config;
use crate::error::LinkError;
use crate::hid::keyboard::KeyboardLeds;
use crate::hid::{self, HidReport, MAX_REPORT_SIZE, REPORT_ID_CONSUMER, REPORT_ID_KEYBOARD};

pub const HID_COMMAND_DEPTH: usize = 8;
pub const BLE_EVENT_DEPTH: usize = 8;

pub type HidCommandChannel = Channel<CriticalSectionRawMutex, HidCommand, HID_COMMAND_DEPTH>;
pub type BleEventChannel = Channel<CriticalSectionRawMutex, BleEvent, BLE_EVENT_DEPTH>;
pub type HidCommandReceiver = Receiver<'static, CriticalSectionRawMutex, HidCommand, HID_COMMAND_DEPTH>;
pub type BleEventSender = Sender<'static, CriticalSectionRawMutex, BleEvent, BLE_EVENT_DEPTH>;

/// Requests from the event loop to the radio task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidCommand {
    Advertise(AdvertiseMode),
    Reports([HidReport; 2]),
    Disconnect,
    ForgetBonds,
    LowPower(bool),
    /// Battery service level, percent.
    Battery(u8),
}

/// [`HidLink`] over the command channel. Never waits: a full queue drops.
pub struct ChannelHidLink {
    tx: Sender<'static, CriticalSectionRawMutex, HidCommand, HID_COMMAND_DEPTH>,
}

impl ChannelHidLink {
    pub fn new(tx: Sender<'static, CriticalSectionRawMutex, HidCommand, HID_COMMAND_DEPTH>) -> Self {
        Self { tx }
    }

    fn push(&mut self, cmd: HidCommand) {
        if self.tx.try_send(cmd).is_err() {
            warn!("BLE: command queue full, {:?} dropped", cmd);
        }
    }

    pub fn set_battery(&mut self, percent: u8) {
        self.push(HidCommand::Battery(percent));
    }
}

impl HidLink for ChannelHidLink {
    fn advertise(&mut self, mode: AdvertiseMode) {
        self.push(HidCommand::Advertise(mode));
    }

    fn send_reports(&mut self, pair: [HidReport; 2]) -> Result<(), LinkError> {
        self.tx
            .try_send(HidCommand::Reports(pair))
            .map_err(|_| LinkError::QueueFull)
    }

    fn disconnect(&mut self) {
        self.push(HidCommand::Disconnect);
    }

    fn forget_bonds(&mut self) {
        self.push(HidCommand::ForgetBonds);
    }

    fn set_low_power(&mut self, low_power: bool) {
        self.push(HidCommand::LowPower(low_power));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GATT services
// ═══════════════════════════════════════════════════════════════════════════

const HID_SERVICE: Uuid = Uuid::new_16(0x1812);
const HID_INFO: Uuid = Uuid::new_16(0x2A4A);
const HID_REPORT_MAP: Uuid = Uuid::new_16(0x2A4B);
const HID_CONTROL_POINT: Uuid = Uuid::new_16(0x2A4C);
const HID_REPORT: Uuid = Uuid::new_16(0x2A4D);
const HID_PROTOCOL_MODE: Uuid = Uuid::new_16(0x2A4E);
const REPORT_REFERENCE: Uuid = Uuid::new_16(0x2908);

const DIS_SERVICE: Uuid = Uuid::new_16(0x180A);
const DIS_MODEL: Uuid = Uuid::new_16(0x2A24);
const DIS_FIRMWARE: Uuid = Uuid::new_16(0x2A26);
const DIS_MANUFACTURER: Uuid = Uuid::new_16(0x2A29);
const DIS_PNP_ID: Uuid = Uuid::new_16(0x2A50);

const BATTERY_SERVICE: Uuid = Uuid::new_16(0x180F);
const BATTERY_LEVEL: Uuid = Uuid::new_16(0x2A19);

/// bcdHID 1.11, country 0, normally connectable.
const HID_INFO_VALUE: [u8; 4] = [0x11, 0x01, 0x00, 0x02];

/// USB-IF vendor source, pid.codes test VID/PID, version 1.0.
const PNP_ID: [u8; 7] = [0x02, 0x09, 0x12, 0x01, 0x00, 0x00, 0x01];

const REPORT_TYPE_INPUT: u8 = 1;
const REPORT_TYPE_OUTPUT: u8 = 2;

struct HidService {
    control_point: u16,
    protocol_mode: u16,
    keyboard_input: u16,
    keyboard_output: u16,
    consumer_input: u16,
}

impl HidService {
    fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut sb = ServiceBuilder::new(sd, HID_SERVICE)?;

        sb.add_characteristic(
            HID_INFO,
            Attribute::new(HID_INFO_VALUE),
            Metadata::new(Properties::new().read()),
        )?
        .build();

        sb.add_characteristic(
            HID_REPORT_MAP,
            Attribute::new(&hid::REPORT_MAP[..]).security(SecurityMode::JustWorks),
            Metadata::new(Properties::new().read()),
        )?
        .build();

        let control_point = sb
            .add_characteristic(
                HID_CONTROL_POINT,
                Attribute::new([0u8]).security(SecurityMode::JustWorks),
                Metadata::new(Properties::new().write_without_response()),
            )?
            .build();

        let protocol_mode = sb
            .add_characteristic(
                HID_PROTOCOL_MODE,
                Attribute::new([1u8]).security(SecurityMode::JustWorks),
                Metadata::new(Properties::new().read().write_without_response()),
            )?
            .build();

        let mut kb_in = sb.add_characteristic(
            HID_REPORT,
            Attribute::new([0u8; hid::keyboard::KEYBOARD_REPORT_SIZE])
                .security(SecurityMode::JustWorks),
            Metadata::new(Properties::new().read().notify()),
        )?;
        kb_in.add_descriptor(
            REPORT_REFERENCE,
            Attribute::new([REPORT_ID_KEYBOARD, REPORT_TYPE_INPUT]).security(SecurityMode::JustWorks),
        )?;
        let keyboard_input = kb_in.build();

        // LED state from the host. Accepted and ignored.
        let mut kb_out = sb.add_characteristic(
            HID_REPORT,
            Attribute::new([0u8]).security(SecurityMode::JustWorks),
            Metadata::new(Properties::new().read().write().write_without_response()),
        )?;
        kb_out.add_descriptor(
            REPORT_REFERENCE,
            Attribute::new([REPORT_ID_KEYBOARD, REPORT_TYPE_OUTPUT]).security(SecurityMode::JustWorks),
        )?;
        let keyboard_output = kb_out.build();

        let mut cc_in = sb.add_characteristic(
            HID_REPORT,
            Attribute::new([0u8; hid::consumer::CONSUMER_REPORT_SIZE])
                .security(SecurityMode::JustWorks),
            Metadata::new(Properties::new().read().notify()),
        )?;
        cc_in.add_descriptor(
            REPORT_REFERENCE,
            Attribute::new([REPORT_ID_CONSUMER, REPORT_TYPE_INPUT]).security(SecurityMode::JustWorks),
        )?;
        let consumer_input = cc_in.build();

        sb.build();

        Ok(Self {
            control_point: control_point.value_handle,
            protocol_mode: protocol_mode.value_handle,
            keyboard_input: keyboard_input.value_handle,
            keyboard_output: keyboard_output.value_handle,
            consumer_input: consumer_input.value_handle,
        })
    }

    fn send(&self, conn: &Connection, report: &HidReport) -> bool {
        let mut buf = [0u8; MAX_REPORT_SIZE];
        let len = report.serialize(&mut buf);
        let handle = if report.is_keyboard() {
            self.keyboard_input
        } else {
            self.consumer_input
        };
        match gatt_server::notify_value(conn, handle, &buf[..len]) {
            Ok(()) => true,
            Err(e) => {
                warn!("BLE: notify failed: {:?}", e);
                false
            }
        }
    }

    fn on_write(&self, handle: u16, data: &[u8]) {
        if handle == self.control_point {
            match data.first() {
                Some(0) => debug!("BLE: host suspend"),
                Some(1) => debug!("BLE: host exit suspend"),
                _ => {}
            }
        } else if handle == self.protocol_mode {
            debug!("BLE: protocol mode {:?}", data);
        } else if handle == self.keyboard_output {
            if let Some(leds) = KeyboardLeds::from_bytes(data) {
                trace!("BLE: host LEDs {=u8:#x} caps={}", leds.0, leds.caps_lock());
            }
        }
    }
}

struct DeviceInformationService;

impl DeviceInformationService {
    fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut sb = ServiceBuilder::new(sd, DIS_SERVICE)?;
        let strings = [
            (DIS_MANUFACTURER, config::DEVICE_MANUFACTURER),
            (DIS_MODEL, config::DEVICE_MODEL),
            (DIS_FIRMWARE, config::FIRMWARE_VERSION),
        ];
        for (uuid, value) in strings {
            sb.add_characteristic(
                uuid,
                Attribute::new(value.as_bytes()),
                Metadata::new(Properties::new().read()),
            )?
            .build();
        }
        sb.add_characteristic(
            DIS_PNP_ID,
            Attribute::new(PNP_ID),
            Metadata::new(Properties::new().read()),
        )?
        .build();
        sb.build();
        Ok(Self)
    }
}

struct BatteryService {
    level: u16,
}

impl BatteryService {
    fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut sb = ServiceBuilder::new(sd, BATTERY_SERVICE)?;
        let level = sb
            .add_characteristic(
                BATTERY_LEVEL,
                Attribute::new([100u8]),
                Metadata::new(Properties::new().read().notify()),
            )?
            .build();
        sb.build();
        Ok(Self {
            level: level.value_handle,
        })
    }

    fn update(&self, sd: &Softdevice, conn: Option<&Connection>, percent: u8) {
        if let Err(e) = gatt_server::set_value(sd, self.level, &[percent]) {
            warn!("BLE: battery level not stored: {:?}", e);
        }
        if let Some(conn) = conn {
            // Fails harmlessly when the host has not enabled notifications.
            let _ = gatt_server::notify_value(conn, self.level, &[percent]);
        }
    }
}

pub struct Server {
    _dis: DeviceInformationService,
    battery: BatteryService,
    hid: HidService,
}

impl Server {
    /// Register all services. Must run before the SoftDevice task starts.
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        Ok(Self {
            _dis: DeviceInformationService::new(sd)?,
            battery: BatteryService::new(sd)?,
            hid: HidService::new(sd)?,
        })
    }
}

impl gatt_server::Server for Server {
    type Event = ();

    fn on_write(
        &self,
        _conn: &Connection,
        handle: u16,
        _op: WriteOp,
        _offset: usize,
        data: &[u8],
    ) -> Option<Self::Event> {
        self.hid.on_write(handle, data);
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Bonding
// ═══════════════════════════════════════════════════════════════════════════

/// Security handler for the single bond. Seeded from the Bond Store at
/// boot; new bonds go back to the event loop as [`BleEvent::Bonded`]
/// through the mailbox, which the connection task drains.
struct Bonder {
    bond: Cell<Option<BondRecord>>,
    /// The current link is being encrypted with the stored key.
    restoring: Cell<bool>,
    mailbox: SecurityMailbox,
    posted: Signal<CriticalSectionRawMutex, ()>,
}

impl Bonder {
    fn new(bond: Option<BondRecord>) -> Self {
        Self {
            bond: Cell::new(bond),
            restoring: Cell::new(false),
            mailbox: SecurityMailbox::new(),
            posted: Signal::new(),
        }
    }

    fn new_link(&self) {
        self.restoring.set(false);
    }

    fn clear(&self) {
        self.bond.set(None);
    }

    fn emit(&self, ev: BleEvent) {
        self.mailbox.post(ev);
        self.posted.signal(());
    }

    async fn deliver(&self, events: &BleEventSender) {
        while let Some(ev) = self.mailbox.take() {
            events.send(ev).await;
        }
    }
}

/// Forward security outcomes for the lifetime of the link.
async fn forward_security(bonder: &Bonder, events: &BleEventSender) {
    loop {
        bonder.posted.wait().await;
        bonder.deliver(events).await;
    }
}

fn peer_address(addr: Address) -> PeerAddress {
    PeerAddress {
        kind: addr.address_type() as u8,
        bytes: addr.bytes(),
    }
}

fn bond_record(master_id: MasterId, key: EncryptionInfo, peer_id: IdentityKey) -> BondRecord {
    BondRecord {
        peer: peer_address(peer_id.addr),
        ltk: key.ltk,
        ltk_flags: key.flags,
        ediv: master_id.ediv,
        rand: master_id.rand,
        irk: peer_id.irk.as_raw().irk,
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let record = bond_record(master_id, key, peer_id);
        info!("BLE: bonded with {:?}", record.peer);
        self.bond.set(Some(record));
        self.emit(BleEvent::Bonded(record));
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        let bond = self.bond.get()?;
        if bond.ediv != master_id.ediv || bond.rand != master_id.rand {
            debug!("BLE: host asked for an unknown key");
            return None;
        }
        self.restoring.set(true);
        Some(EncryptionInfo {
            ltk: bond.ltk,
            flags: bond.ltk_flags,
        })
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("BLE: security mode {:?}", mode);
        if matches!(mode, SecurityMode::NoAccess | SecurityMode::Open) {
            return;
        }
        if self.restoring.replace(false) {
            if let Some(bond) = self.bond.get() {
                self.emit(BleEvent::Secured { peer: bond.peer });
            }
        }
    }
}

/// Wait for the link to be encrypted, bounded by `timeout`.
async fn wait_for_secure_link(conn: &Connection, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match conn.security_mode() {
            SecurityMode::NoAccess | SecurityMode::Open => {
                Timer::after(Duration::from_millis(200)).await
            }
            _ => return true,
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════
// Radio task
// ═══════════════════════════════════════════════════════════════════════════

static PAIRABLE_ADV: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::GeneralDiscovery, Flag::LE_Only])
    .services_16(
        ServiceList::Incomplete,
        &[ServiceUuid16::HUMAN_INTERFACE_DEVICE, ServiceUuid16::BATTERY],
    )
    .raw(
        AdvertisementDataType::APPEARANCE,
        &config::BLE_APPEARANCE.to_le_bytes(),
    )
    .build();

// Not discoverable: only the bonded host connects back.
static RECONNECT_ADV: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .flags(&[Flag::LE_Only])
    .services_16(
        ServiceList::Incomplete,
        &[ServiceUuid16::HUMAN_INTERFACE_DEVICE],
    )
    .raw(
        AdvertisementDataType::APPEARANCE,
        &config::BLE_APPEARANCE.to_le_bytes(),
    )
    .build();

static SCAN_DATA: LegacyAdvertisementPayload = LegacyAdvertisementBuilder::new()
    .full_name(config::BLE_DEVICE_NAME)
    .build();

fn conn_params(low_power: bool) -> raw::ble_gap_conn_params_t {
    raw::ble_gap_conn_params_t {
        min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
        max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
        slave_latency: if low_power {
            config::BLE_SLAVE_LATENCY_LOW_POWER
        } else {
            config::BLE_SLAVE_LATENCY
        },
        conn_sup_timeout: config::BLE_SUP_TIMEOUT,
    }
}

#[derive(Default)]
struct Radio {
    /// `None` until the session asks for advertising.
    mode: Option<AdvertiseMode>,
    low_power: bool,
    battery: Option<u8>,
}

impl Radio {
    /// Apply a command while not connected. Returns `true` if advertising
    /// must restart with new parameters.
    fn apply_idle(&mut self, cmd: HidCommand, bonder: &Bonder) -> bool {
        match cmd {
            HidCommand::Advertise(mode) => {
                let changed = self.mode != Some(mode);
                self.mode = Some(mode);
                changed
            }
            HidCommand::LowPower(lp) => {
                let changed = self.low_power != lp;
                self.low_power = lp;
                changed && self.mode.is_some()
            }
            HidCommand::ForgetBonds => {
                bonder.clear();
                false
            }
            HidCommand::Battery(level) => {
                self.battery = Some(level);
                false
            }
            HidCommand::Reports(_) => {
                debug!("BLE: reports without a link, dropped");
                false
            }
            HidCommand::Disconnect => false,
        }
    }
}

async fn advertise(
    sd: &'static Softdevice,
    mode: AdvertiseMode,
    low_power: bool,
    bonder: &'static Bonder,
) -> Result<Connection, peripheral::AdvertiseError> {
    let adv_data = match mode {
        AdvertiseMode::Pairable => &PAIRABLE_ADV,
        AdvertiseMode::Reconnect => &RECONNECT_ADV,
    };
    let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
        adv_data,
        scan_data: &SCAN_DATA,
    };
    let config = peripheral::Config {
        interval: if low_power {
            config::BLE_ADV_INTERVAL_SLOW
        } else {
            config::BLE_ADV_INTERVAL_FAST
        },
        ..Default::default()
    };
    info!("BLE: advertising {:?} (low power {})", mode, low_power);
    peripheral::advertise_pairable(sd, adv, &config, bonder).await
}

/// Fail the link if it is not encrypted in time. Never returns otherwise.
async fn secure_watchdog(conn: &Connection, events: &BleEventSender) {
    if !wait_for_secure_link(conn, config::BLE_SECURE_TIMEOUT).await {
        warn!("BLE: link not secured in time");
        events.send(BleEvent::PairingFailed).await;
        let _ = conn.disconnect();
    }
    core::future::pending::<()>().await
}

async fn serve_commands(
    sd: &'static Softdevice,
    conn: &Connection,
    server: &Server,
    radio: &mut Radio,
    commands: &HidCommandReceiver,
    bonder: &Bonder,
) {
    loop {
        match commands.receive().await {
            HidCommand::Reports(pair) => {
                for report in &pair {
                    if !server.hid.send(conn, report) {
                        break;
                    }
                }
            }
            HidCommand::Disconnect => {
                let _ = conn.disconnect();
            }
            HidCommand::ForgetBonds => bonder.clear(),
            HidCommand::LowPower(lp) => {
                radio.low_power = lp;
                if let Err(e) = conn.set_conn_params(conn_params(lp)) {
                    warn!("BLE: conn params update failed: {:?}", e);
                }
            }
            // Takes effect once this link is gone.
            HidCommand::Advertise(mode) => radio.mode = Some(mode),
            HidCommand::Battery(level) => {
                radio.battery = Some(level);
                server.battery.update(sd, Some(conn), level);
            }
        }
    }
}

async fn run_connection(
    sd: &'static Softdevice,
    conn: Connection,
    server: &Server,
    radio: &mut Radio,
    commands: &HidCommandReceiver,
    events: &BleEventSender,
    bonder: &Bonder,
) {
    let peer = peer_address(conn.peer_address());
    info!("BLE: connected to {:?}", peer);
    bonder.new_link();
    events.send(BleEvent::Connected { peer }).await;
    if let Err(e) = conn.set_conn_params(conn_params(radio.low_power)) {
        debug!("BLE: conn params request failed: {:?}", e);
    }

    let gatt = gatt_server::run(&conn, server, |_| {});
    let watchdog = secure_watchdog(&conn, events);
    let cmds = serve_commands(sd, &conn, server, radio, commands, bonder);
    let security = forward_security(bonder, events);
    match select4(gatt, watchdog, cmds, security).await {
        Either4::First(e) => info!("BLE: disconnected: {:?}", e),
        Either4::Second(()) | Either4::Third(()) | Either4::Fourth(()) => {}
    }
    // A bond completed just before the link dropped still reaches the loop.
    bonder.deliver(events).await;
    events.send(BleEvent::Disconnected).await;
}

/// Radio task body. Never returns.
pub async fn run(
    sd: &'static Softdevice,
    server: &'static Server,
    bond: Option<BondRecord>,
    commands: HidCommandReceiver,
    events: BleEventSender,
) -> ! {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    let bonder: &'static Bonder = BONDER.init(Bonder::new(bond));

    let mut radio = Radio::default();
    loop {
        let Some(mode) = radio.mode else {
            let cmd = commands.receive().await;
            radio.apply_idle(cmd, bonder);
            continue;
        };

        match select(advertise(sd, mode, radio.low_power, bonder), commands.receive()).await {
            Either::First(Ok(conn)) => {
                // Advertising stopped with the connection; the session asks
                // again once the link is gone.
                radio.mode = None;
                if let Some(level) = radio.battery {
                    server.battery.update(sd, None, level);
                }
                run_connection(sd, conn, server, &mut radio, &commands, &events, bonder).await;
            }
            Either::First(Err(e)) => {
                error!("BLE: advertising failed: {:?}", e);
                Timer::after(Duration::from_secs(1)).await;
            }
            Either::Second(cmd) => {
                if radio.apply_idle(cmd, bonder) {
                    debug!("BLE: restarting advertising");
                }
            }
        }
    }
}
