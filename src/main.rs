//! something-remote - nRF52840 firmware entry point.
//!
//! Boot order:
//! 1. Embassy HAL with interrupt priorities the SoftDevice allows
//! 2. Reset reason and motion pin level → [`WakeSource`]
//! 3. Motion sensor probe and wake configuration (I²C)
//! 4. SoftDevice + GATT server, then Bond Store / Config from flash
//! 5. Radio, button, motion, UART and battery tasks
//! 6. The event loop: one [`Dispatcher`] owning all application state
//!
//! Usage: `cargo run --release --features embedded`

#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select4, Either4};
use embassy_nrf::gpio::{AnyPin, Input, Level, Output, OutputDrive, Pin as _, Pull};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::peripherals::{TIMER1, TWISPI0, UARTE0};
use embassy_nrf::saadc::{self, ChannelConfig, Saadc, VddhDiv5Input};
use embassy_nrf::twim::{self, Twim};
use embassy_nrf::uarte::{self, Uarte, UarteRxWithIdle, UarteTx};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Instant, Timer};
use nrf_softdevice::{self as sd, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use something_remote::ble::peripheral::{
    self, BleEventChannel, ChannelHidLink, HidCommandChannel, Server,
};
use something_remote::board;
use something_remote::bond_store::{BondRecord, BondStore};
use something_remote::bridge::discovery::device_id;
use something_remote::bridge::uart_link::{self, LineChannel, UartBrokerLink};
use something_remote::config::{self, BATTERY_SAMPLE_INTERVAL, MPU6050_ADDR};
use something_remote::input::ButtonId;
use something_remote::motion::MotionSensor;
use something_remote::power::{battery_percent, WakeSource};
use something_remote::settings::ConfigStore;
use something_remote::ui::buttons::{self, INPUT_QUEUE, INPUT_SIGNAL};
use something_remote::ui::led::LedIndicator;
use something_remote::{BootInfo, Dispatcher, Event, Links, SystemRequest};

bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<peripherals::TWISPI0>;
    UARTE0_UART0 => uarte::InterruptHandler<peripherals::UARTE0>;
    SAADC => saadc::InterruptHandler;
});

const APP_EVENT_DEPTH: usize = 8;

static HID_COMMANDS: HidCommandChannel = Channel::new();
static BLE_EVENTS: BleEventChannel = Channel::new();
static LINES: LineChannel = Channel::new();
/// Motion, battery and co-processor events for the loop.
static EVENTS: Channel<CriticalSectionRawMutex, Event, APP_EVENT_DEPTH> = Channel::new();

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(sd::raw::nrf_clock_lf_cfg_t {
            source: sd::raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: sd::raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(sd::raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(sd::raw::ble_gatt_conn_cfg_t { att_mtu: 64 }),
        gatts_attr_tab_size: Some(sd::raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: sd::raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(sd::raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: sd::raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(sd::raw::ble_gap_cfg_device_name_t {
            p_value: config::BLE_DEVICE_NAME.as_ptr() as _,
            current_len: config::BLE_DEVICE_NAME.len() as u16,
            max_len: config::BLE_DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: sd::raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                sd::raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("something-remote v{}", config::FIRMWARE_VERSION);

    let mut c = embassy_nrf::config::Config::default();
    c.gpiote_interrupt_priority = Priority::P2;
    c.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(c);
    interrupt::SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0.set_priority(Priority::P3);
    interrupt::UARTE0_UART0.set_priority(Priority::P3);
    interrupt::SAADC.set_priority(Priority::P3);

    // Status LED: red while booting.
    let led = LedIndicator::new(
        Output::new(p.P0_13, Level::High, OutputDrive::Standard),
        Output::new(p.P0_14, Level::Low, OutputDrive::Standard),
        Output::new(p.P0_15, Level::Low, OutputDrive::Standard),
    );

    // Must be read before the SoftDevice owns POWER. Pulled down so an
    // unfitted sensor reads low.
    let motion_int = Input::new(p.P0_08, Pull::Down);
    let woke_from_system_off = board::woke_from_system_off();
    let motion_latched = motion_int.is_high();

    let i2c = Twim::new(p.TWISPI0, Irqs, p.P0_26, p.P0_27, twim::Config::default());
    let mut sensor = MotionSensor::new(i2c, MPU6050_ADDR);
    let sensor_present = match sensor.probe() {
        Ok(()) => match sensor.configure_wake(&mut Delay) {
            Ok(()) => true,
            Err(e) => {
                warn!("Motion sensor configuration failed: {:?}", e);
                false
            }
        },
        Err(_) => false,
    };
    let wake_source = WakeSource::from_reset(woke_from_system_off, motion_latched, sensor_present);

    let sd = Softdevice::enable(&softdevice_config());
    static SERVER: StaticCell<Server> = StaticCell::new();
    let server: &'static Server = SERVER.init(unwrap!(Server::new(sd)));
    let sd: &'static Softdevice = sd;
    spawner.must_spawn(softdevice_task(sd));

    let mut flash = nrf_softdevice::Flash::take(sd);
    let mut bonds = BondStore::new();
    bonds.load_from_flash(&mut flash).await;
    let mut settings = ConfigStore::new();
    settings.load_from_flash(&mut flash).await;

    spawner.must_spawn(ble_task(sd, server, bonds.get().copied()));

    let pins: [AnyPin; ButtonId::COUNT] = [
        p.P0_02.degrade(),
        p.P0_03.degrade(),
        p.P0_04.degrade(),
        p.P0_05.degrade(),
        p.P0_28.degrade(),
        p.P0_29.degrade(),
        p.P0_30.degrade(),
        p.P0_31.degrade(),
        p.P1_10.degrade(),
        p.P1_11.degrade(),
        p.P1_12.degrade(),
        p.P1_13.degrade(),
        p.P1_14.degrade(),
        p.P1_15.degrade(),
        p.P0_11.degrade(),
        p.P0_12.degrade(),
        p.P1_01.degrade(),
        p.P1_02.degrade(),
        p.P1_03.degrade(),
        p.P1_04.degrade(),
        p.P1_05.degrade(),
    ];
    for (pin, button) in pins.into_iter().zip(ButtonId::ALL) {
        spawner.must_spawn(button_task(pin, button, wake_source));
    }

    if sensor_present {
        spawner.must_spawn(motion_task(motion_int, sensor));
    }

    let mut uart_config = uarte::Config::default();
    uart_config.baudrate = uarte::Baudrate::BAUD115200;
    let uart = Uarte::new(p.UARTE0, Irqs, p.P0_07, p.P0_06, uart_config);
    let (uart_tx, uart_rx) = uart.split_with_idle(p.TIMER1, p.PPI_CH0, p.PPI_CH1);
    spawner.must_spawn(uart_tx_task(uart_tx));
    spawner.must_spawn(uart_rx_task(uart_rx));

    let adc = Saadc::new(
        p.SAADC,
        Irqs,
        saadc::Config::default(),
        [ChannelConfig::single_ended(VddhDiv5Input)],
    );
    spawner.must_spawn(battery_task(adc));

    let links = Links {
        hid: ChannelHidLink::new(HID_COMMANDS.sender()),
        broker: UartBrokerLink::new(LINES.sender()),
        indicator: led,
    };
    let boot = BootInfo {
        device_id: device_id(board::chip_id()),
        wake_source,
        sensor_present,
    };
    let mut dispatcher = Dispatcher::new(&INPUT_QUEUE, links, bonds, settings, boot, Instant::now());
    dispatcher.boot(Instant::now());

    loop {
        let deadline = dispatcher.next_deadline();
        let timer = async {
            match deadline {
                Some(at) => Timer::at(at).await,
                None => core::future::pending().await,
            }
        };
        let event = match select4(
            INPUT_SIGNAL.wait(),
            BLE_EVENTS.receive(),
            EVENTS.receive(),
            timer,
        )
        .await
        {
            Either4::First(()) => Event::Input,
            Either4::Second(ev) => Event::Ble(ev),
            Either4::Third(ev) => ev,
            Either4::Fourth(()) => Event::Tick,
        };

        if let Event::Battery { millivolts } = event {
            dispatcher
                .links_mut()
                .hid
                .set_battery(battery_percent(millivolts));
        }
        dispatcher.handle(event, Instant::now());
        dispatcher.persist(&mut flash).await;

        while let Some(req) = dispatcher.take_request() {
            match req {
                SystemRequest::OpenSetupPortal => dispatcher.links_mut().broker.open_portal(),
                SystemRequest::DeepSleep(pins) => {
                    dispatcher.persist(&mut flash).await;
                    board::system_off(pins);
                }
                SystemRequest::FactoryReset => {
                    dispatcher.factory_reset();
                    dispatcher.persist(&mut flash).await;
                    board::reset();
                }
            }
        }
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, server: &'static Server, bond: Option<BondRecord>) -> ! {
    peripheral::run(sd, server, bond, HID_COMMANDS.receiver(), BLE_EVENTS.sender()).await
}

#[embassy_executor::task(pool_size = 21)]
async fn button_task(pin: AnyPin, button: ButtonId, wake_source: WakeSource) -> ! {
    buttons::button_task(pin, button, wake_source).await
}

/// Forward latched motion interrupts until the sensor stops answering.
#[embassy_executor::task]
async fn motion_task(mut int: Input<'static>, mut sensor: MotionSensor<Twim<'static, TWISPI0>>) {
    loop {
        int.wait_for_high().await;
        match sensor.check_motion() {
            Ok(true) => EVENTS.send(Event::Motion).await,
            Ok(false) => {}
            Err(_) => {
                EVENTS.send(Event::MotionSensorFault).await;
                return;
            }
        }
    }
}

#[embassy_executor::task]
async fn uart_tx_task(tx: UarteTx<'static, UARTE0>) -> ! {
    uart_link::write_lines(tx, LINES.receiver()).await
}

#[embassy_executor::task]
async fn uart_rx_task(rx: UarteRxWithIdle<'static, UARTE0, TIMER1>) -> ! {
    uart_link::read_lines(rx, EVENTS.sender()).await
}

#[embassy_executor::task]
async fn battery_task(mut adc: Saadc<'static, 1>) -> ! {
    adc.calibrate().await;
    loop {
        let mut buf = [0i16; 1];
        adc.sample(&mut buf).await;
        let millivolts = board::vddh_millivolts(buf[0]);
        EVENTS.send(Event::Battery { millivolts }).await;
        Timer::after(BATTERY_SAMPLE_INTERVAL).await;
    }
}
