//! Per-channel control surface.
//!
//! A [`Channel`] is a stateless, borrowed view onto one output of its owning
//! instrument: every accessor issues exactly one command or query on the
//! shared link. Nothing is cached, because device state changes out-of-band
//! (front-panel operation, protection trips), so a read always reflects the
//! supply's current value.
//!
//! Setters format values with the device's documented numeric grammar:
//! three fixed decimal places.

use crate::error::{PsuError, PsuResult};
use crate::instrument::{Cpx400dp, Instrument};

/// The largest channel count any supported supply exposes.
pub const MAX_CHANNELS: u8 = 4;

/// One output channel of a CPX400DP, indexed from 1.
#[derive(Debug)]
pub struct Channel<'a> {
    psu: &'a Cpx400dp,
    index: u8,
}

impl<'a> Channel<'a> {
    pub(crate) fn new(psu: &'a Cpx400dp, index: u8) -> Self {
        Self { psu, index }
    }

    /// The 1-based channel index.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Live output voltage in volts (`V{n}O?`).
    pub fn voltage(&self) -> PsuResult<f64> {
        let response = self.psu.query(&format!("V{}O?", self.index))?;
        parse_suffixed(&response, 'V')
    }

    /// Live output current in amps (`I{n}O?`).
    pub fn current(&self) -> PsuResult<f64> {
        let response = self.psu.query(&format!("I{}O?", self.index))?;
        parse_suffixed(&response, 'A')
    }

    /// Configured voltage setpoint in volts (`V{n}?`).
    pub fn voltage_setpoint(&self) -> PsuResult<f64> {
        let response = self.psu.query(&format!("V{}?", self.index))?;
        parse_echoed_value(&response)
    }

    /// Sets the voltage setpoint in volts (`V{n} {value:.3}`).
    pub fn set_voltage_setpoint(&self, volts: f64) -> PsuResult<()> {
        self.psu.send(&format!("V{} {volts:.3}", self.index))
    }

    /// Configured current setpoint in amps (`I{n}?`).
    pub fn current_setpoint(&self) -> PsuResult<f64> {
        let response = self.psu.query(&format!("I{}?", self.index))?;
        parse_echoed_value(&response)
    }

    /// Sets the current setpoint in amps (`I{n} {value:.3}`).
    pub fn set_current_setpoint(&self, amps: f64) -> PsuResult<()> {
        self.psu.send(&format!("I{} {amps:.3}", self.index))
    }

    /// Over-voltage protection trip level in volts (`OVP{n}?`).
    pub fn over_voltage_protection(&self) -> PsuResult<f64> {
        let response = self.psu.query(&format!("OVP{}?", self.index))?;
        parse_echoed_value(&response)
    }

    /// Sets the over-voltage protection trip level (`OVP{n} {value:.3}`).
    pub fn set_over_voltage_protection(&self, volts: f64) -> PsuResult<()> {
        self.psu.send(&format!("OVP{} {volts:.3}", self.index))
    }

    /// Over-current protection trip level in amps (`OCP{n}?`).
    pub fn over_current_protection(&self) -> PsuResult<f64> {
        let response = self.psu.query(&format!("OCP{}?", self.index))?;
        parse_echoed_value(&response)
    }

    /// Sets the over-current protection trip level (`OCP{n} {value:.3}`).
    pub fn set_over_current_protection(&self, amps: f64) -> PsuResult<()> {
        self.psu.send(&format!("OCP{} {amps:.3}", self.index))
    }

    /// Whether the output is currently enabled (`OP{n}?`).
    pub fn is_on(&self) -> PsuResult<bool> {
        let response = self.psu.query(&format!("OP{}?", self.index))?;
        let state = parse_echoed_value(&response)? as i64;
        Ok(state != 0)
    }

    /// Enables the output (`OP{n} 1`).
    pub fn turn_on(&self) -> PsuResult<()> {
        self.psu.send(&format!("OP{} 1", self.index))
    }

    /// Disables the output (`OP{n} 0`).
    pub fn turn_off(&self) -> PsuResult<()> {
        self.psu.send(&format!("OP{} 0", self.index))
    }
}

/// Parses a live-measurement response like `"13.800V"` or `"0.250A"`.
fn parse_suffixed(response: &str, unit: char) -> PsuResult<f64> {
    response
        .trim()
        .trim_end_matches(unit)
        .trim()
        .parse()
        .map_err(|_| {
            PsuError::ProtocolParse(format!(
                "expected a number with '{unit}' suffix, got '{response}'"
            ))
        })
}

/// Parses a setting response that echoes the command, like `"V1 5.000"`.
fn parse_echoed_value(response: &str) -> PsuResult<f64> {
    response
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| {
            PsuError::ProtocolParse(format!(
                "expected an echoed 'CMD value' response, got '{response}'"
            ))
        })?
        .parse()
        .map_err(|_| {
            PsuError::ProtocolParse(format!(
                "non-numeric value in echoed response '{response}'"
            ))
        })
}
