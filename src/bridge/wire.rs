//! Line protocol spoken with the WiFi/MQTT network co-processor.
//!
//! One message per `\n`-terminated line, fields separated by `\t`.
//!
//! MCU → co-processor:
//! ```text
//! WIFI\t<ssid>\t<password>
//! MQTT\t<host>\t<port>\t<user>\t<password>\t<client_id>\t<keepalive>
//! CONNECT
//! PUB\t<0|1 retain>\t<topic>\t<payload>
//! PING | DISCONNECT | PORTAL
//! ```
//!
//! Co-processor → MCU:
//! ```text
//! CONNECTED | CONNFAIL | DISCONNECTED | PONG
//! CFG_BEGIN, then CFG\t<key>\t<value> per field, then CFG_END
//! ```
//!
//! Config keys are the setup portal's form names (see
//! [`Config::set_field`]).

use core::fmt::Write;

use heapless::{String, Vec};

use super::BrokerEvent;
use crate::config::BROKER_KEEPALIVE_SECS;
use crate::error::Error;
use crate::settings::Config;

/// Longest line either side may send, terminator excluded. Fits the
/// largest discovery publication.
pub const MAX_LINE: usize = 704;

pub type Line = String<MAX_LINE>;

/// Argument-less commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Connect,
    Ping,
    Disconnect,
    /// Start the captive setup portal.
    Portal,
}

impl Command {
    pub const fn keyword(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Ping => "PING",
            Command::Disconnect => "DISCONNECT",
            Command::Portal => "PORTAL",
        }
    }

    pub fn line(self) -> Line {
        let mut line = Line::new();
        // Keywords are far below MAX_LINE.
        let _ = line.push_str(self.keyword());
        line
    }
}

fn push_field(line: &mut Line, value: &str) -> Result<(), Error> {
    if value.contains(['\t', '\n', '\r']) {
        return Err(Error::Encoding);
    }
    line.push('\t').map_err(|_| Error::BufferOverflow)?;
    line.push_str(value).map_err(|_| Error::BufferOverflow)
}

fn start(keyword: &str) -> Line {
    let mut line = Line::new();
    let _ = line.push_str(keyword);
    line
}

/// Lines that bring up WiFi and the broker session, in order.
pub fn connect_lines(config: &Config, client_id: &str) -> Result<[Line; 3], Error> {
    let mut wifi = start("WIFI");
    push_field(&mut wifi, &config.wifi_ssid)?;
    push_field(&mut wifi, &config.wifi_password)?;

    let mut port: String<6> = String::new();
    let _ = write!(port, "{}", config.broker_port());
    let mut keepalive: String<6> = String::new();
    let _ = write!(keepalive, "{}", BROKER_KEEPALIVE_SECS);

    let mut mqtt = start("MQTT");
    push_field(&mut mqtt, &config.broker_host)?;
    push_field(&mut mqtt, &port)?;
    push_field(&mut mqtt, &config.broker_user)?;
    push_field(&mut mqtt, &config.broker_password)?;
    push_field(&mut mqtt, client_id)?;
    push_field(&mut mqtt, &keepalive)?;

    Ok([wifi, mqtt, Command::Connect.line()])
}

pub fn publish_line(topic: &str, payload: &str, retain: bool) -> Result<Line, Error> {
    let mut line = start("PUB");
    push_field(&mut line, if retain { "1" } else { "0" })?;
    push_field(&mut line, topic)?;
    push_field(&mut line, payload)?;
    Ok(line)
}

/// A complete message from the co-processor.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Broker(BrokerEvent),
    /// A full config block from the setup portal.
    Config(Config),
}

/// Reassembles lines from the byte stream and decodes them.
pub struct LineDecoder {
    buf: Vec<u8, MAX_LINE>,
    /// Current line overran the buffer; skip to the next newline.
    discarding: bool,
    pending: Option<Config>,
}

impl LineDecoder {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            discarding: false,
            pending: None,
        }
    }

    /// Feed one received byte. Returns a message when a line completes.
    pub fn push(&mut self, byte: u8) -> Option<Inbound> {
        match byte {
            b'\n' => {
                let discarded = core::mem::replace(&mut self.discarding, false);
                let out = if discarded {
                    None
                } else {
                    match core::str::from_utf8(&self.buf) {
                        Ok(line) => {
                            // Borrow of buf ends before decode mutates self.
                            let mut owned = Line::new();
                            let _ = owned.push_str(line);
                            self.decode(&owned)
                        }
                        Err(_) => {
                            warn!("Wire: non-UTF-8 line dropped");
                            None
                        }
                    }
                };
                self.buf.clear();
                out
            }
            b'\r' => None,
            _ if self.discarding => None,
            _ => {
                if self.buf.push(byte).is_err() {
                    warn!("Wire: line too long, dropped");
                    self.buf.clear();
                    self.discarding = true;
                }
                None
            }
        }
    }

    fn decode(&mut self, line: &str) -> Option<Inbound> {
        let mut parts = line.splitn(3, '\t');
        let keyword = parts.next()?;
        match keyword {
            "" => None,
            "CONNECTED" => Some(Inbound::Broker(BrokerEvent::Connected)),
            "CONNFAIL" => Some(Inbound::Broker(BrokerEvent::ConnectFailed)),
            "DISCONNECTED" => Some(Inbound::Broker(BrokerEvent::Disconnected)),
            "PONG" => Some(Inbound::Broker(BrokerEvent::PingResponse)),
            "CFG_BEGIN" => {
                self.pending = Some(Config::default());
                None
            }
            "CFG" => {
                let (Some(key), value) = (parts.next(), parts.next().unwrap_or("")) else {
                    warn!("Wire: malformed CFG line");
                    return None;
                };
                match self.pending.as_mut() {
                    Some(config) => {
                        if config.set_field(key, value).is_err() {
                            warn!("Wire: config field {} rejected", key);
                        }
                    }
                    None => warn!("Wire: CFG outside a config block"),
                }
                None
            }
            "CFG_END" => {
                let config = self.pending.take();
                if config.is_none() {
                    warn!("Wire: CFG_END without CFG_BEGIN");
                }
                config.map(Inbound::Config)
            }
            other => {
                debug!("Wire: unknown line {}", other);
                None
            }
        }
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}
