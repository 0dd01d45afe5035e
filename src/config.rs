//! Type-safe connection configuration.
//!
//! The defaults match the serial parameters from the CPX400DP user manual:
//! 9600 baud, 8 data bits, no parity, 1 stop bit, XON/XOFF flow control.
//! Only deviations need to be spelled out in a configuration file:
//!
//! ```toml
//! [psu]
//! location = "/dev/ttyUSB0"
//! read_timeout = "2s"
//! channels = 2
//! ```

use crate::channel::MAX_CHANNELS;
use crate::error::{PsuError, PsuResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parity setting for the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit (the CPX400DP default).
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Flow-control setting for the serial link.
///
/// The CPX400DP uses software flow control: it asserts XOFF with roughly
/// 200 of its 256 queue bytes used and XON again with roughly 100 free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control.
    None,
    /// XON/XOFF software flow control (the CPX400DP default).
    Software,
    /// RTS/CTS hardware flow control.
    Hardware,
}

/// Serial framing and connection parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate (manual: 9600).
    pub baud_rate: u32,
    /// Data bits per character, 5..=8 (manual: 8).
    pub data_bits: u8,
    /// Parity (manual: none).
    pub parity: Parity,
    /// Stop bits, 1 or 2 (manual: 1).
    pub stop_bits: u8,
    /// Flow control (manual: XON/XOFF).
    pub flow_control: FlowControl,
    /// How long a read waits for a complete response line.
    ///
    /// Must be bounded; the driver never blocks indefinitely on the device.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Number of addressable output channels, 1..=4 (CPX400DP: 2).
    pub channels: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::Software,
            read_timeout: Duration::from_secs(1),
            channels: 2,
        }
    }
}

impl SerialConfig {
    /// Creates a configuration from a TOML value.
    pub fn from_toml(value: &toml::Value) -> PsuResult<Self> {
        let text = toml::to_string(value).map_err(|e| PsuError::Config(e.to_string()))?;
        toml::from_str(&text).map_err(|e| PsuError::Config(e.to_string()))
    }

    /// Validates the configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns `Err` if:
    /// - `baud_rate` is zero
    /// - `data_bits` is outside 5..=8
    /// - `stop_bits` is not 1 or 2
    /// - `read_timeout` is zero (a read must never wait forever)
    /// - `channels` is outside 1..=[`MAX_CHANNELS`]
    pub fn validate(&self) -> PsuResult<()> {
        if self.baud_rate == 0 {
            return Err(PsuError::Config("baud_rate must be non-zero".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(PsuError::Config(format!(
                "data_bits must be 5..=8, got {}",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(PsuError::Config(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(PsuError::Config(
                "read_timeout must be non-zero; reads are always bounded".into(),
            ));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(PsuError::Config(format!(
                "channels must be 1..={MAX_CHANNELS}, got {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Creates a validated configuration from TOML in one call.
    pub fn from_toml_validated(value: &toml::Value) -> PsuResult<Self> {
        let config = Self::from_toml(value)?;
        config.validate()?;
        Ok(config)
    }
}
