/*
 * Manual control CLI for a CPX400DP bench supply.
 *
 * Talks to one supply on one serial port. Useful for bring-up and for
 * checking wiring before handing the port to an application: every
 * subcommand opens the instrument (identity query + status reporting
 * enables), performs one operation, and closes again.
 *
 * Set RUST_LOG=debug to watch the status-register traffic, or
 * RUST_LOG=trace to see the raw lines on the wire.
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cpx400dp::{Cpx400dp, Instrument, SerialConfig, ShutdownCoordinator};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "psu_cli", about = "Manual control for a CPX400DP power supply")]
struct Cli {
    /// Serial port the supply is connected to, e.g. /dev/ttyUSB0
    #[arg(long)]
    port: String,

    /// Read timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the instrument identity
    Idn,
    /// Print live measurements and setpoints for one channel
    Status {
        /// Channel index (1 or 2)
        channel: u8,
    },
    /// Set the voltage setpoint
    SetVoltage {
        /// Channel index (1 or 2)
        channel: u8,
        /// Volts
        volts: f64,
    },
    /// Set the current setpoint
    SetCurrent {
        /// Channel index (1 or 2)
        channel: u8,
        /// Amps
        amps: f64,
    },
    /// Switch a channel output on or off
    Output {
        /// Channel index (1 or 2)
        channel: u8,
        /// Desired output state
        state: OutputState,
    },
    /// Reset the instrument to its power-on defaults
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputState {
    On,
    Off,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = SerialConfig {
        read_timeout: Duration::from_millis(cli.timeout_ms),
        ..SerialConfig::default()
    };
    config.validate()?;

    let psu = Cpx400dp::open("psu_cli", &cli.port, &config)
        .with_context(|| format!("Could not open supply on {}", cli.port))?;

    let outcome = run(&psu, &cli.command);

    // Close through the coordinator so a wedged port cannot hang exit.
    ShutdownCoordinator::new()
        .run(Duration::from_secs(5))
        .context("Shutdown did not complete cleanly")?;

    outcome
}

fn run(psu: &Cpx400dp, command: &Command) -> Result<()> {
    match command {
        Command::Idn => {
            let identity = psu.identity();
            println!(
                "{} {} serial {} firmware {}",
                identity.manufacturer,
                identity.model,
                identity.serial_number,
                identity.firmware_version
            );
        }
        Command::Status { channel } => {
            let ch = psu.channel(*channel)?;
            println!("CH{} output: {}", channel, if ch.is_on()? { "on" } else { "off" });
            println!("  measured: {:.3} V, {:.3} A", ch.voltage()?, ch.current()?);
            println!(
                "  setpoints: {:.3} V, {:.3} A",
                ch.voltage_setpoint()?,
                ch.current_setpoint()?
            );
            println!(
                "  protection: OVP {:.3} V, OCP {:.3} A",
                ch.over_voltage_protection()?,
                ch.over_current_protection()?
            );
            for event in psu.recent_limit_events() {
                println!("  limit: {event}");
            }
        }
        Command::SetVoltage { channel, volts } => {
            psu.channel(*channel)?.set_voltage_setpoint(*volts)?;
            println!("CH{channel} voltage setpoint -> {volts:.3} V");
        }
        Command::SetCurrent { channel, amps } => {
            psu.channel(*channel)?.set_current_setpoint(*amps)?;
            println!("CH{channel} current setpoint -> {amps:.3} A");
        }
        Command::Output { channel, state } => {
            let ch = psu.channel(*channel)?;
            match state {
                OutputState::On => ch.turn_on()?,
                OutputState::Off => ch.turn_off()?,
            }
            println!(
                "CH{channel} output -> {}",
                match state {
                    OutputState::On => "on",
                    OutputState::Off => "off",
                }
            );
        }
        Command::Reset => {
            psu.reset()?;
            println!("Instrument reset to defaults");
        }
    }
    Ok(())
}
