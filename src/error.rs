//! Custom error types for the driver.
//!
//! This module defines the primary error type, `PsuError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the distinct failure classes of the driver:
//!
//! - **Transport errors** (`TransportOpen`, `TransportWrite`, `TransportRead`,
//!   `TransportTimeout`): the serial link itself failed. These abort the
//!   in-flight command immediately.
//! - **Protocol errors** (`ProtocolParse`, `ProtocolConsistency`): the bytes
//!   on the wire did not make sense. `ProtocolConsistency` is reserved for
//!   register readings outside the 8-bit range, which the hardware cannot
//!   legitimately produce; it indicates transport corruption rather than a
//!   device condition.
//! - **Device errors** (`DeviceExecution`, `UnknownExecutionError`,
//!   `DeviceTimeout`): the instrument understood the command and rejected it,
//!   or reported an internal fault through its status registers.
//! - **Lifecycle errors** (`InstrumentClosed`, `NoSuchChannel`,
//!   `ShutdownTimeout`, `ShutdownFailed`): misuse of a handle or a shutdown
//!   that could not finish in time.
//!
//! There is no automatic retry anywhere in the driver: a timed-out read is
//! reported once and callers decide whether to retry.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type PsuResult<T> = std::result::Result<T, PsuError>;

/// Errors produced by the power-supply driver.
#[derive(Error, Debug)]
pub enum PsuError {
    /// The serial port could not be opened or configured.
    #[error("Failed to open serial link at '{location}': {source}")]
    TransportOpen {
        /// Device path that was attempted.
        location: String,
        /// Underlying serial-port error.
        #[source]
        source: serialport::Error,
    },

    /// Writing to the serial port failed.
    #[error("Serial write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// Reading from the serial port failed (other than by timing out).
    #[error("Serial read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    /// No complete response line arrived within the read timeout.
    #[error("No response from the instrument within the read timeout")]
    TransportTimeout,

    /// A response was malformed, or the device reported a parse/query error.
    #[error("Protocol error: {0}")]
    ProtocolParse(String),

    /// A status register reported a value outside 0..=255.
    ///
    /// Registers are inherently 8-bit, so this can only come from transport
    /// corruption. Fatal for the in-flight operation only.
    #[error("{register} register returned {value}, outside the 8-bit range")]
    ProtocolConsistency {
        /// Which register produced the impossible value.
        register: &'static str,
        /// The raw value as parsed.
        value: i64,
    },

    /// The device rejected a command for a documented reason.
    #[error("Device rejected command: {message}")]
    DeviceExecution {
        /// Execution error code from the `EER?` register.
        code: u32,
        /// Documented message for the code, e.g.
        /// `"104: Command not valid with output on"`.
        message: String,
    },

    /// The `EER?` register returned a code missing from the documented table.
    #[error("Unknown execution error code from device: {0}")]
    UnknownExecutionError(u32),

    /// The device reported a verify timeout in its event status register.
    #[error("Device reported a verify timeout")]
    DeviceTimeout,

    /// The shutdown deadline elapsed before all instruments were closed.
    #[error("Timeout expired before all instruments could be shut down")]
    ShutdownTimeout,

    /// Shutdown finished but one or more closes failed along the way.
    #[error("Shutdown completed with errors")]
    ShutdownFailed(Vec<PsuError>),

    /// An operation was attempted on an instrument after `close()`.
    #[error("Instrument '{0}' is closed")]
    InstrumentClosed(String),

    /// A channel index outside the instrument's channel count was requested.
    #[error("Channel {index} does not exist (instrument has {channels} channel(s))")]
    NoSuchChannel {
        /// The 1-based index that was requested.
        index: u8,
        /// How many channels the instrument actually has.
        channels: u8,
    },

    /// Invalid connection configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
