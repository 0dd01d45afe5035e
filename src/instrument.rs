//! The CPX400DP instrument and its protocol engine.
//!
//! [`Cpx400dp::open`] owns the whole connection lifecycle: it opens the
//! serial transport, reads the device identity, and enables full status and
//! event reporting (`*SRE 255`, `*ESE 255`, `LSE{n} 255`, each verified by a
//! read-back) so every later device condition is observable through the
//! status cascade. The handle is returned as an `Arc` and tracked by the
//! process-wide [registry](crate::registry) until [`Cpx400dp::close`] runs.
//!
//! `send` and `query` are the only paths to the wire. Each one takes the
//! instrument lock for the full command cycle — the write, the optional
//! response read, and the status cascade with its sub-queries — so commands
//! from concurrent callers never interleave on the shared link.

use crate::channel::{Channel, MAX_CHANNELS};
use crate::config::SerialConfig;
use crate::error::{PsuError, PsuResult};
use crate::registry;
use crate::status::{self, LimitEvent};
use crate::transport::{SerialTransport, Transport};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Identity reported by `*IDN?`, populated once at open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Manufacturer name, e.g. `THURLBY`.
    pub manufacturer: String,
    /// Model number, e.g. `CPX400DP`.
    pub model: String,
    /// Serial number of the unit.
    pub serial_number: String,
    /// Firmware revision.
    pub firmware_version: String,
}

impl FromStr for Identity {
    type Err = PsuError;

    fn from_str(s: &str) -> PsuResult<Self> {
        let mut fields = s.trim().split(',').map(str::trim);
        let mut next = |name: &str| {
            fields
                .next()
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    PsuError::ProtocolParse(format!(
                        "identity response '{s}' is missing the {name} field"
                    ))
                })
        };
        Ok(Self {
            manufacturer: next("manufacturer")?,
            model: next("model")?,
            serial_number: next("serial number")?,
            firmware_version: next("firmware version")?,
        })
    }
}

/// Capability surface shared by instrument handles.
///
/// The registry and the shutdown coordinator work purely against this trait,
/// so they do not care which concrete supply sits behind a handle.
pub trait Instrument: Send + Sync {
    /// Caller-chosen instrument name.
    fn name(&self) -> &str;
    /// Where the physical link lives.
    fn location(&self) -> &str;
    /// Identity captured at open.
    fn identity(&self) -> &Identity;
    /// Sends a command that produces no response, then checks status.
    fn send(&self, command: &str) -> PsuResult<()>;
    /// Sends a query, reads one response line, then checks status.
    fn query(&self, command: &str) -> PsuResult<String>;
    /// Resets the device to its power-on defaults.
    fn reset(&self) -> PsuResult<()>;
    /// Closes the link. Idempotent: repeat calls are no-ops.
    fn close(&self) -> PsuResult<()>;
    /// Whether `close` has already completed.
    fn is_closed(&self) -> bool;
}

struct Inner {
    /// `None` once the instrument has been closed.
    transport: Option<Box<dyn Transport>>,
    /// Limit events observed during the most recent command cycle.
    limit_events: Vec<LimitEvent>,
}

/// Handle to one CPX400DP on one serial link.
pub struct Cpx400dp {
    name: String,
    location: String,
    identity: Identity,
    channel_count: u8,
    inner: Mutex<Inner>,
    registry_id: OnceCell<u64>,
}

impl fmt::Debug for Cpx400dp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpx400dp")
            .field("name", &self.name)
            .field("location", &self.location)
            .field("identity", &self.identity)
            .field("channel_count", &self.channel_count)
            .finish_non_exhaustive()
    }
}

impl Cpx400dp {
    /// Opens the supply at `location` and brings it to a known state.
    pub fn open(name: &str, location: &str, config: &SerialConfig) -> PsuResult<Arc<Self>> {
        config.validate()?;
        let transport = SerialTransport::open(location, config)?;
        Self::start(name, Box::new(transport), config.channels)
    }

    /// Opens the supply over an already-built transport.
    ///
    /// This is the injection seam for tests and for non-serial links; it runs
    /// the same identity and reporting-enable sequence as [`Cpx400dp::open`].
    pub fn with_transport(
        name: &str,
        transport: Box<dyn Transport>,
        channels: u8,
    ) -> PsuResult<Arc<Self>> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(PsuError::Config(format!(
                "channels must be 1..={MAX_CHANNELS}, got {channels}"
            )));
        }
        Self::start(name, transport, channels)
    }

    fn start(name: &str, mut transport: Box<dyn Transport>, channels: u8) -> PsuResult<Arc<Self>> {
        let location = transport.location().to_string();
        let mut events = Vec::new();

        let identity: Identity = engine_query(transport.as_mut(), "*IDN?", &mut events)?.parse()?;
        info!(
            "Connected to {} {} (serial {}, firmware {}) at {location}",
            identity.manufacturer,
            identity.model,
            identity.serial_number,
            identity.firmware_version
        );

        // Enable full status and event reporting up front so that every
        // later condition shows up in the status byte.
        enable_reporting(transport.as_mut(), "*SRE", "*SRE?", &mut events)?;
        enable_reporting(transport.as_mut(), "*ESE", "*ESE?", &mut events)?;
        for n in 1..=channels {
            enable_reporting(
                transport.as_mut(),
                &format!("LSE{n}"),
                &format!("LSE{n}?"),
                &mut events,
            )?;
        }

        let psu = Arc::new(Self {
            name: name.to_string(),
            location,
            identity,
            channel_count: channels,
            inner: Mutex::new(Inner {
                transport: Some(transport),
                limit_events: events,
            }),
            registry_id: OnceCell::new(),
        });

        let handle: Weak<dyn Instrument> = Arc::downgrade(&psu) as Weak<dyn Instrument>;
        let id = registry::global().add(handle);
        let _ = psu.registry_id.set(id);
        Ok(psu)
    }

    /// Number of addressable output channels.
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Accessor for channel `index` (1-based).
    pub fn channel(&self, index: u8) -> PsuResult<Channel<'_>> {
        if index == 0 || index > self.channel_count {
            return Err(PsuError::NoSuchChannel {
                index,
                channels: self.channel_count,
            });
        }
        Ok(Channel::new(self, index))
    }

    /// First output channel.
    pub fn ch1(&self) -> PsuResult<Channel<'_>> {
        self.channel(1)
    }

    /// Second output channel.
    pub fn ch2(&self) -> PsuResult<Channel<'_>> {
        self.channel(2)
    }

    /// Limit events observed during the most recent command cycle.
    ///
    /// Limit conditions describe protective behavior, not failures, so they
    /// are logged as warnings and retained here rather than raised.
    pub fn recent_limit_events(&self) -> Vec<LimitEvent> {
        self.lock().limit_events.clone()
    }

    /// Clears all device status registers (`*CLS`).
    pub fn clear_status(&self) -> PsuResult<()> {
        self.send("*CLS")
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn do_send(&self, command: &str) -> PsuResult<()> {
        let mut inner = self.lock();
        let Inner {
            transport,
            limit_events,
        } = &mut *inner;
        let transport = transport
            .as_mut()
            .ok_or_else(|| PsuError::InstrumentClosed(self.name.clone()))?;
        limit_events.clear();
        engine_send(transport.as_mut(), command, limit_events)
    }

    fn do_query(&self, command: &str) -> PsuResult<String> {
        let mut inner = self.lock();
        let Inner {
            transport,
            limit_events,
        } = &mut *inner;
        let transport = transport
            .as_mut()
            .ok_or_else(|| PsuError::InstrumentClosed(self.name.clone()))?;
        limit_events.clear();
        engine_query(transport.as_mut(), command, limit_events)
    }

    fn do_close(&self) -> PsuResult<()> {
        let mut inner = self.lock();
        let Some(mut transport) = inner.transport.take() else {
            return Ok(());
        };
        match transport.flush() {
            Ok(stats) if stats.input_bytes > 0 || stats.output_bytes > 0 => debug!(
                "Discarded {} unread / {} unsent byte(s) while closing '{}'",
                stats.input_bytes, stats.output_bytes, self.name
            ),
            Ok(_) => {}
            Err(e) => warn!("Failed to flush '{}' while closing: {e}", self.name),
        }
        if let Some(id) = self.registry_id.get() {
            registry::global().remove(*id);
        }
        info!("Closed instrument '{}'", self.name);
        Ok(())
        // The transport is dropped here, releasing the serial port.
    }
}

impl Instrument for Cpx400dp {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn send(&self, command: &str) -> PsuResult<()> {
        self.do_send(command)
    }

    fn query(&self, command: &str) -> PsuResult<String> {
        self.do_query(command)
    }

    fn reset(&self) -> PsuResult<()> {
        self.do_send("*RST")
    }

    fn close(&self) -> PsuResult<()> {
        self.do_close()
    }

    fn is_closed(&self) -> bool {
        self.lock().transport.is_none()
    }
}

impl Drop for Cpx400dp {
    fn drop(&mut self) {
        // Safety net for handles dropped without an explicit close; the
        // registry entry dies with the Arc either way.
        let still_open = self
            .inner
            .get_mut()
            .map(|inner| inner.transport.is_some())
            .unwrap_or(false);
        if still_open {
            warn!(
                "Instrument '{}' dropped without close; closing now",
                self.name
            );
            let _ = self.do_close();
        }
    }
}

impl fmt::Display for Cpx400dp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}: {} {} serial {} firmware {}",
            self.name,
            self.location,
            self.identity.manufacturer,
            self.identity.model,
            self.identity.serial_number,
            self.identity.firmware_version
        )
    }
}

/// Writes `command` and runs the status cascade.
fn engine_send(
    transport: &mut dyn Transport,
    command: &str,
    events: &mut Vec<LimitEvent>,
) -> PsuResult<()> {
    transport.write_line(command)?;
    status::run_cascade(transport, events)
}

/// Writes `command`, reads one response line, and runs the status cascade.
///
/// If the response read times out, the cascade still runs first: the status
/// registers usually know why the device stayed silent, and that richer
/// error replaces the bare timeout. Otherwise the timeout is re-raised.
fn engine_query(
    transport: &mut dyn Transport,
    command: &str,
    events: &mut Vec<LimitEvent>,
) -> PsuResult<String> {
    transport.discard_stale_input()?;
    transport.write_line(command)?;
    let response = match transport.read_line() {
        Ok(response) => response,
        Err(PsuError::TransportTimeout) => {
            status::run_cascade(transport, events)?;
            return Err(PsuError::TransportTimeout);
        }
        Err(e) => return Err(e),
    };
    status::run_cascade(transport, events)?;
    Ok(response)
}

/// Sets a reporting-enable register to 255 and verifies it by read-back.
fn enable_reporting(
    transport: &mut dyn Transport,
    set_prefix: &str,
    verify_query: &str,
    events: &mut Vec<LimitEvent>,
) -> PsuResult<()> {
    engine_send(transport, &format!("{set_prefix} 255"), events)?;
    let readback = engine_query(transport, verify_query, events)?;
    if readback.trim() != "255" {
        return Err(PsuError::ProtocolParse(format!(
            "{verify_query} read back '{readback}' after {set_prefix} 255, expected 255"
        )));
    }
    Ok(())
}
