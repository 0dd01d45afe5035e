//! Line-oriented serial transport.
//!
//! The [`Transport`] trait is the seam between the protocol engine and the
//! physical link, so tests can substitute a scripted fake. The production
//! implementation, [`SerialTransport`], wraps a blocking `serialport` handle
//! configured with the framing from the CPX400DP manual and reads with an
//! explicit deadline — never indefinitely.

use crate::config::{self, SerialConfig};
use crate::error::{PsuError, PsuResult};
use log::{trace, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Line terminator used by the CPX400DP in both directions.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Per-read poll interval; the overall deadline is enforced in `read_line`.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Counts of bytes discarded by [`Transport::flush`], for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Unread bytes discarded from the input buffer.
    pub input_bytes: u32,
    /// Unsent bytes discarded from the output buffer.
    pub output_bytes: u32,
}

/// Byte-level seam between the protocol engine and the physical link.
///
/// All methods are blocking with bounded waits. One `Transport` is owned by
/// exactly one instrument and is only ever used under that instrument's lock.
pub trait Transport: Send {
    /// Writes one command line, appending the terminator if absent.
    fn write_line(&mut self, line: &str) -> PsuResult<()>;

    /// Blocks until a complete line (terminator included) has arrived or the
    /// read timeout elapses; returns the line without its terminator.
    fn read_line(&mut self) -> PsuResult<String>;

    /// Number of received bytes waiting to be read.
    fn bytes_pending(&mut self) -> PsuResult<u32>;

    /// Discards unread input only.
    fn clear_input(&mut self) -> PsuResult<()>;

    /// Discards unread input and unsent output, reporting how much was lost.
    fn flush(&mut self) -> PsuResult<FlushStats>;

    /// Human-readable link location (device path, or a fake's label).
    fn location(&self) -> &str;

    /// Discards unread input, if any, with a warning.
    ///
    /// Called before every exchange that expects a response: a stale reply
    /// from an earlier, mis-sequenced exchange must never be attributed to
    /// the next query.
    fn discard_stale_input(&mut self) -> PsuResult<()> {
        let pending = self.bytes_pending()?;
        if pending > 0 {
            warn!(
                "Flushing {pending} unread byte(s) from '{}' before next exchange",
                self.location()
            );
            self.clear_input()?;
        }
        Ok(())
    }
}

/// Appends the line terminator unless the line already carries one.
fn ensure_terminated(line: &str) -> String {
    if line.ends_with(LINE_TERMINATOR) {
        line.to_string()
    } else {
        format!("{line}{LINE_TERMINATOR}")
    }
}

fn serial_io_err(e: serialport::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

/// Blocking serial link to the instrument.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    location: String,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Opens and configures the serial port at `location`.
    ///
    /// The port's own timeout is set short ([`POLL_TIMEOUT`]); the
    /// configured `read_timeout` bounds the whole-line deadline instead, so
    /// a slow device fails predictably rather than hanging a caller.
    pub fn open(location: &str, config: &SerialConfig) -> PsuResult<Self> {
        config.validate()?;
        let port = serialport::new(location, config.baud_rate)
            .data_bits(map_data_bits(config.data_bits)?)
            .parity(map_parity(config.parity))
            .stop_bits(map_stop_bits(config.stop_bits)?)
            .flow_control(map_flow_control(config.flow_control))
            .timeout(POLL_TIMEOUT)
            .open()
            .map_err(|source| PsuError::TransportOpen {
                location: location.to_string(),
                source,
            })?;
        Ok(Self {
            port,
            location: location.to_string(),
            read_timeout: config.read_timeout,
        })
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> PsuResult<()> {
        let data = ensure_terminated(line);
        trace!("{} <- '{}'", self.location, data.escape_default());
        self.port
            .write_all(data.as_bytes())
            .map_err(PsuError::TransportWrite)
    }

    fn read_line(&mut self) -> PsuResult<String> {
        let deadline = Instant::now() + self.read_timeout;
        let mut buffer = [0u8; 256];
        let mut line: Vec<u8> = Vec::new();

        loop {
            match self.port.read(&mut buffer) {
                Ok(0) => std::thread::sleep(Duration::from_millis(10)),
                Ok(n) => {
                    line.extend_from_slice(&buffer[..n]);
                    if let Some(pos) = find_terminator(&line) {
                        let extra = line.len() - (pos + LINE_TERMINATOR.len());
                        if extra > 0 {
                            warn!(
                                "Discarding {extra} byte(s) read past the response terminator \
                                 on '{}'",
                                self.location
                            );
                        }
                        line.truncate(pos);
                        let text = String::from_utf8_lossy(&line).into_owned();
                        trace!("{} -> '{}'", self.location, text.escape_default());
                        return Ok(text);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PsuError::TransportRead(e)),
            }
            if Instant::now() >= deadline {
                return Err(PsuError::TransportTimeout);
            }
        }
    }

    fn bytes_pending(&mut self) -> PsuResult<u32> {
        self.port
            .bytes_to_read()
            .map_err(|e| PsuError::TransportRead(serial_io_err(e)))
    }

    fn clear_input(&mut self) -> PsuResult<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| PsuError::TransportRead(serial_io_err(e)))
    }

    fn flush(&mut self) -> PsuResult<FlushStats> {
        let stats = FlushStats {
            input_bytes: self
                .port
                .bytes_to_read()
                .map_err(|e| PsuError::TransportRead(serial_io_err(e)))?,
            output_bytes: self
                .port
                .bytes_to_write()
                .map_err(|e| PsuError::TransportWrite(serial_io_err(e)))?,
        };
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| PsuError::TransportRead(serial_io_err(e)))?;
        Ok(stats)
    }

    fn location(&self) -> &str {
        &self.location
    }
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(LINE_TERMINATOR.len())
        .position(|w| w == LINE_TERMINATOR.as_bytes())
}

fn map_data_bits(bits: u8) -> PsuResult<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(PsuError::Config(format!("unsupported data_bits {other}"))),
    }
}

fn map_stop_bits(bits: u8) -> PsuResult<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(PsuError::Config(format!("unsupported stop_bits {other}"))),
    }
}

fn map_parity(parity: config::Parity) -> Parity {
    match parity {
        config::Parity::None => Parity::None,
        config::Parity::Odd => Parity::Odd,
        config::Parity::Even => Parity::Even,
    }
}

fn map_flow_control(flow: config::FlowControl) -> FlowControl {
    match flow {
        config::FlowControl::None => FlowControl::None,
        config::FlowControl::Software => FlowControl::Software,
        config::FlowControl::Hardware => FlowControl::Hardware,
    }
}
