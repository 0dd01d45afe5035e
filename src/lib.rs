//! # CPX400DP Driver
//!
//! Driver for the Aim-TTi (Thurlby-Thandar) CPX400DP dual-channel bench
//! power supply over a single RS-232 link. The crate covers the device's
//! command/response protocol, its cascading status-register decode, and the
//! lifecycle bookkeeping that guarantees every opened instrument is closed
//! exactly once — including during process shutdown.
//!
//! ## Crate Structure
//!
//! - **`config`**: serial framing and connection parameters
//!   (`SerialConfig`), loadable from TOML with manual-matching defaults.
//! - **`error`**: the `PsuError` taxonomy separating transport, protocol,
//!   device, and lifecycle failures.
//! - **`transport`**: the `Transport` seam and the blocking
//!   `SerialTransport` line codec.
//! - **`status`**: the three-level status cascade (`*STB?` → `LSR?`/`*ESR?`
//!   → `EER?`), limit-event observations, and the execution-error table.
//! - **`instrument`**: the `Cpx400dp` handle, its open/close lifecycle, and
//!   the locked `send`/`query` protocol engine.
//! - **`channel`**: per-output accessors for voltage, current, protection
//!   limits, and output switching.
//! - **`registry`**: process-wide tracking of every open instrument.
//! - **`shutdown`**: the deadline-bounded close-everything hook.
//!
//! ## Example
//!
//! ```no_run
//! use cpx400dp::{Cpx400dp, Instrument, SerialConfig};
//!
//! # fn main() -> cpx400dp::PsuResult<()> {
//! let psu = Cpx400dp::open("bench-psu", "/dev/ttyUSB0", &SerialConfig::default())?;
//! let ch1 = psu.ch1()?;
//! ch1.set_voltage_setpoint(12.0)?;
//! ch1.set_over_current_protection(1.5)?;
//! ch1.turn_on()?;
//! println!("CH1 now at {} V", ch1.voltage()?);
//! psu.close()?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod instrument;
pub mod registry;
pub mod shutdown;
pub mod status;
pub mod transport;

pub use channel::{Channel, MAX_CHANNELS};
pub use config::SerialConfig;
pub use error::{PsuError, PsuResult};
pub use instrument::{Cpx400dp, Identity, Instrument};
pub use shutdown::ShutdownCoordinator;
pub use status::{LimitCondition, LimitEvent};
pub use transport::{FlushStats, SerialTransport, Transport};
