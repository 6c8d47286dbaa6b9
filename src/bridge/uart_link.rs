//! UARTE transport to the network co-processor.
//!
//! [`UartBrokerLink`] only formats lines and queues them; the writer task
//! drains the queue onto the wire. The reader task turns received lines
//! into dispatcher events.

use embassy_nrf::timer::Instance as TimerInstance;
use embassy_nrf::uarte::{Instance, UarteRxWithIdle, UarteTx};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

use super::wire::{self, Command, Inbound, Line, LineDecoder};
use super::BrokerLink;
use crate::dispatcher::Event;
use crate::error::LinkError;
use crate::settings::Config;

/// Outbound lines. Deep enough for a full discovery burst.
pub const LINE_QUEUE_DEPTH: usize = 24;

pub type LineChannel = Channel<CriticalSectionRawMutex, Line, LINE_QUEUE_DEPTH>;
pub type LineSender = Sender<'static, CriticalSectionRawMutex, Line, LINE_QUEUE_DEPTH>;
pub type LineReceiver = Receiver<'static, CriticalSectionRawMutex, Line, LINE_QUEUE_DEPTH>;

pub struct UartBrokerLink {
    tx: LineSender,
}

impl UartBrokerLink {
    pub fn new(tx: LineSender) -> Self {
        Self { tx }
    }

    fn push(&mut self, line: Line) -> Result<(), LinkError> {
        self.tx.try_send(line).map_err(|_| LinkError::QueueFull)
    }

    fn command(&mut self, cmd: Command) {
        if self.push(cmd.line()).is_err() {
            warn!("Uart: queue full, {} dropped", cmd.keyword());
        }
    }

    /// Ask the co-processor to bring up the setup portal.
    pub fn open_portal(&mut self) {
        self.command(Command::Portal);
    }
}

impl BrokerLink for UartBrokerLink {
    fn connect(&mut self, config: &Config, client_id: &str) {
        match wire::connect_lines(config, client_id) {
            Ok(lines) => {
                for line in lines {
                    // A lost line shows up as a connect timeout and is retried.
                    if self.push(line).is_err() {
                        warn!("Uart: queue full during connect");
                        return;
                    }
                }
            }
            Err(e) => error!("Uart: config cannot be sent: {:?}", e),
        }
    }

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), LinkError> {
        let line = wire::publish_line(topic, payload, retain).map_err(|e| {
            warn!("Uart: publish to {} not encodable: {:?}", topic, e);
            LinkError::Closed
        })?;
        self.push(line)
    }

    fn ping(&mut self) {
        self.command(Command::Ping);
    }

    fn disconnect(&mut self) {
        self.command(Command::Disconnect);
    }
}

/// Writer task body: one queued line at a time, `\n`-terminated.
pub async fn write_lines<T: Instance>(mut tx: UarteTx<'static, T>, lines: LineReceiver) -> ! {
    loop {
        let line = lines.receive().await;
        trace!("Uart: > {}", line.as_str());
        let r = match tx.write(line.as_bytes()).await {
            Ok(()) => tx.write(b"\n").await,
            Err(e) => Err(e),
        };
        if let Err(e) = r {
            warn!("Uart: write failed: {:?}", e);
        }
    }
}

/// Reader task body. Decoded messages become [`Event::Broker`] or
/// [`Event::ConfigUpdated`].
pub async fn read_lines<T: Instance, U: TimerInstance, const N: usize>(
    mut rx: UarteRxWithIdle<'static, T, U>,
    events: Sender<'static, CriticalSectionRawMutex, Event, N>,
) -> ! {
    let mut decoder = LineDecoder::new();
    let mut chunk = [0u8; 64];
    loop {
        let n = match rx.read_until_idle(&mut chunk).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Uart: read failed: {:?}", e);
                continue;
            }
        };
        for &byte in &chunk[..n] {
            let Some(msg) = decoder.push(byte) else {
                continue;
            };
            let event = match msg {
                Inbound::Broker(ev) => Event::Broker(ev),
                Inbound::Config(config) => {
                    info!("Uart: config received from setup portal");
                    Event::ConfigUpdated(config)
                }
            };
            events.send(event).await;
        }
    }
}
