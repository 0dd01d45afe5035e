//! Status-register decode.
//!
//! After every command or query the driver reads the Status Byte Register
//! (`*STB?`) and walks the registers it points at: the per-channel Limit
//! Status Registers (`LSR{n}?`) and the Event Status Register (`*ESR?`),
//! which may in turn point at the Execution Error Register (`EER?`). Reading
//! a register clears it on the device.
//!
//! The walk is deliberately written as straight-line code with one function
//! per level — status byte, then limit/event status, then execution error —
//! so its depth is bounded by structure (three levels) rather than by luck.
//! Every set status-byte bit is handled in the same pass: a single `*STB?`
//! reading can legitimately report a channel-1 limit event and a pending
//! event-status condition together, and both are surfaced.
//!
//! Limit-register bits describe protective behavior (the supply doing its
//! job), so they become warning-level [`LimitEvent`] observations, never
//! errors. Event-register bits describe protocol or execution failures and
//! are raised as errors.

use crate::error::{PsuError, PsuResult};
use crate::transport::Transport;
use log::{debug, warn};
use std::fmt;

/// Condition reported by a channel's Limit Status Register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCondition {
    /// Output entered constant-voltage limit mode (bit 0).
    VoltageLimitMode,
    /// Output entered constant-current limit mode (bit 1).
    CurrentLimitMode,
    /// Over-voltage protection tripped (bit 2).
    OverVoltageTrip,
    /// Over-current protection tripped (bit 3).
    OverCurrentTrip,
    /// Output entered unregulated power-limit mode (bit 4).
    PowerLimitMode,
    /// A trip occurred that needs a front-panel reset (bit 6).
    FrontPanelResetTrip,
}

impl LimitCondition {
    fn describe(self) -> &'static str {
        match self {
            LimitCondition::VoltageLimitMode => "entered voltage limit mode",
            LimitCondition::CurrentLimitMode => "entered current limit mode",
            LimitCondition::OverVoltageTrip => "over voltage trip occurred",
            LimitCondition::OverCurrentTrip => "over current trip occurred",
            LimitCondition::PowerLimitMode => "entered power limit mode (unregulated)",
            LimitCondition::FrontPanelResetTrip => "trip occurred (front panel reset required)",
        }
    }
}

/// A warning-level observation decoded from a Limit Status Register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitEvent {
    /// 1-based channel the condition belongs to.
    pub channel: u8,
    /// The protective condition the channel entered.
    pub condition: LimitCondition,
}

impl fmt::Display for LimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{} {}", self.channel, self.condition.describe())
    }
}

/// Bit masks of the Limit Status Register. Bits 5 and 7 are unused.
const LIMIT_BITS: [(u8, LimitCondition); 6] = [
    (0x01, LimitCondition::VoltageLimitMode),
    (0x02, LimitCondition::CurrentLimitMode),
    (0x04, LimitCondition::OverVoltageTrip),
    (0x08, LimitCondition::OverCurrentTrip),
    (0x10, LimitCondition::PowerLimitMode),
    (0x40, LimitCondition::FrontPanelResetTrip),
];

/// Documented execution-error messages from the CPX400DP manual.
///
/// Returns `None` for codes outside the documented table.
pub fn execution_error_message(code: u32) -> Option<&'static str> {
    Some(match code {
        0 => "0: No error encountered",
        1 => "1: Internal hardware error",
        2 => "2: Internal hardware error",
        3 => "3: Internal hardware error",
        4 => "4: Internal hardware error",
        5 => "5: Internal hardware error",
        6 => "6: Internal hardware error",
        7 => "7: Internal hardware error",
        8 => "8: Internal hardware error",
        9 => "9: Internal hardware error",
        100 => "100: Range error. Input value invalid",
        101 => "101: Corrupted setup data",
        102 => "102: Missing setup data",
        103 => "103: No second output",
        104 => "104: Command not valid with output on",
        200 => "200: Read only, interface is locked",
        _ => return None,
    })
}

/// Runs the full status cascade: `*STB?`, then whatever it points at.
///
/// Limit observations are logged and appended to `events`; observations
/// recorded before a fatal condition is found are kept, so the caller still
/// sees them alongside the returned error.
pub(crate) fn run_cascade(
    transport: &mut dyn Transport,
    events: &mut Vec<LimitEvent>,
) -> PsuResult<()> {
    let stb = query_register(transport, "*STB?", "status byte")?;
    process_status_byte(transport, stb, events)
}

fn process_status_byte(
    transport: &mut dyn Transport,
    stb: u8,
    events: &mut Vec<LimitEvent>,
) -> PsuResult<()> {
    debug!("STB = {stb:#04x}");
    if stb & 0x01 != 0 {
        let lsr = query_register(transport, "LSR1?", "limit status")?;
        process_limit_status(lsr, 1, events);
    }
    if stb & 0x02 != 0 {
        let lsr = query_register(transport, "LSR2?", "limit status")?;
        process_limit_status(lsr, 2, events);
    }
    // Bits 2, 3 and 7 are unused; bit 4 (message available) and bit 6
    // (RQS/MSS) carry no error information and need no handling.
    if stb & 0x20 != 0 {
        let esr = query_register(transport, "*ESR?", "event status")?;
        process_event_status(transport, esr)?;
    }
    Ok(())
}

fn process_limit_status(lsr: u8, channel: u8, events: &mut Vec<LimitEvent>) {
    for (mask, condition) in LIMIT_BITS {
        if lsr & mask != 0 {
            let event = LimitEvent { channel, condition };
            warn!("{event}");
            events.push(event);
        }
    }
}

fn process_event_status(transport: &mut dyn Transport, esr: u8) -> PsuResult<()> {
    // Bit 0 (operation complete) and bit 7 (power-on) are informational;
    // bits 1 and 6 are unused. Error bits are checked in ascending order and
    // the first fatal condition wins.
    if esr & 0x04 != 0 {
        // The manual is incomplete on what exactly triggers this bit, so it
        // is treated as fatal for the in-flight operation.
        return Err(PsuError::ProtocolParse(
            "device reported a query error".to_string(),
        ));
    }
    if esr & 0x08 != 0 {
        return Err(PsuError::DeviceTimeout);
    }
    if esr & 0x10 != 0 {
        let code = query_error_code(transport)?;
        raise_execution_error(code)?;
    }
    if esr & 0x20 != 0 {
        return Err(PsuError::ProtocolParse(
            "device failed to parse the last command".to_string(),
        ));
    }
    Ok(())
}

fn raise_execution_error(code: u32) -> PsuResult<()> {
    match execution_error_message(code) {
        // Code 0 is "no error"; nothing to raise.
        Some(_) if code == 0 => Ok(()),
        Some(message) => Err(PsuError::DeviceExecution {
            code,
            message: message.to_string(),
        }),
        None => Err(PsuError::UnknownExecutionError(code)),
    }
}

/// Issues a register query and range-checks the reply against 0..=255.
fn query_register(
    transport: &mut dyn Transport,
    command: &str,
    register: &'static str,
) -> PsuResult<u8> {
    let value = query_integer(transport, command, register)?;
    u8::try_from(value).map_err(|_| PsuError::ProtocolConsistency { register, value })
}

/// Issues the `EER?` query. Error codes are small integers but are not an
/// 8-bit register, so they get no range check beyond being non-negative.
fn query_error_code(transport: &mut dyn Transport) -> PsuResult<u32> {
    let value = query_integer(transport, "EER?", "execution error")?;
    u32::try_from(value).map_err(|_| PsuError::ProtocolParse(format!(
        "execution error query returned negative code {value}"
    )))
}

fn query_integer(
    transport: &mut dyn Transport,
    command: &str,
    register: &'static str,
) -> PsuResult<i64> {
    transport.discard_stale_input()?;
    transport.write_line(command)?;
    let response = transport.read_line()?;
    response.trim().parse().map_err(|_| {
        PsuError::ProtocolParse(format!(
            "{register} query '{command}' returned non-numeric response '{response}'"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FlushStats;
    use std::collections::{HashMap, VecDeque};

    /// Minimal scripted transport for exercising the cascade in isolation.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<String, VecDeque<String>>,
        writes: Vec<String>,
        pending: Option<String>,
    }

    impl ScriptedTransport {
        fn respond(mut self, command: &str, responses: &[&str]) -> Self {
            self.responses.insert(
                command.to_string(),
                responses.iter().map(|r| r.to_string()).collect(),
            );
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn write_line(&mut self, line: &str) -> PsuResult<()> {
            let command = line.trim_end().to_string();
            self.pending = self
                .responses
                .get_mut(&command)
                .and_then(|queue| queue.pop_front());
            self.writes.push(command);
            Ok(())
        }

        fn read_line(&mut self) -> PsuResult<String> {
            self.pending.take().ok_or(PsuError::TransportTimeout)
        }

        fn bytes_pending(&mut self) -> PsuResult<u32> {
            Ok(self.pending.as_ref().map_or(0, |p| p.len() as u32))
        }

        fn clear_input(&mut self) -> PsuResult<()> {
            self.pending = None;
            Ok(())
        }

        fn flush(&mut self) -> PsuResult<FlushStats> {
            self.pending = None;
            Ok(FlushStats::default())
        }

        fn location(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn quiet_status_byte_queries_nothing_else() {
        let mut transport = ScriptedTransport::default().respond("*STB?", &["0"]);
        let mut events = Vec::new();
        run_cascade(&mut transport, &mut events).unwrap();
        assert_eq!(transport.writes, vec!["*STB?"]);
        assert!(events.is_empty());
    }

    #[test]
    fn limit_bits_decode_with_channel_tag() {
        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["3"])
            .respond("LSR1?", &["5"])
            .respond("LSR2?", &["64"]);
        let mut events = Vec::new();
        run_cascade(&mut transport, &mut events).unwrap();

        assert_eq!(
            events,
            vec![
                LimitEvent {
                    channel: 1,
                    condition: LimitCondition::VoltageLimitMode
                },
                LimitEvent {
                    channel: 1,
                    condition: LimitCondition::OverVoltageTrip
                },
                LimitEvent {
                    channel: 2,
                    condition: LimitCondition::FrontPanelResetTrip
                },
            ]
        );
    }

    #[test]
    fn unused_limit_bits_are_ignored() {
        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["1"])
            .respond("LSR1?", &["160"]); // bits 5 and 7 only
        let mut events = Vec::new();
        run_cascade(&mut transport, &mut events).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn event_status_raises_parse_and_timeout_errors() {
        for (esr, check) in [
            ("4", true),  // query error -> ProtocolParse
            ("32", true), // command parse error -> ProtocolParse
        ] {
            let mut transport = ScriptedTransport::default()
                .respond("*STB?", &["32"])
                .respond("*ESR?", &[esr]);
            let err = run_cascade(&mut transport, &mut Vec::new()).unwrap_err();
            assert!(
                matches!(err, PsuError::ProtocolParse(_)) == check,
                "esr = {esr}, err = {err:?}"
            );
        }

        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["32"])
            .respond("*ESR?", &["8"]);
        let err = run_cascade(&mut transport, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PsuError::DeviceTimeout));
    }

    #[test]
    fn execution_error_chains_through_eer() {
        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["32"])
            .respond("*ESR?", &["16"])
            .respond("EER?", &["104"]);
        let err = run_cascade(&mut transport, &mut Vec::new()).unwrap_err();
        match err {
            PsuError::DeviceExecution { code, message } => {
                assert_eq!(code, 104);
                assert_eq!(message, "104: Command not valid with output on");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.writes, vec!["*STB?", "*ESR?", "EER?"]);
    }

    #[test]
    fn execution_error_code_zero_is_no_error() {
        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["32"])
            .respond("*ESR?", &["16"])
            .respond("EER?", &["0"]);
        run_cascade(&mut transport, &mut Vec::new()).unwrap();
    }

    #[test]
    fn undocumented_execution_code_is_an_error_itself() {
        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["32"])
            .respond("*ESR?", &["16"])
            .respond("EER?", &["150"]);
        let err = run_cascade(&mut transport, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PsuError::UnknownExecutionError(150)));
    }

    #[test]
    fn out_of_range_register_is_a_consistency_fault() {
        for response in ["256", "300", "-1"] {
            let mut transport = ScriptedTransport::default().respond("*STB?", &[response]);
            let err = run_cascade(&mut transport, &mut Vec::new()).unwrap_err();
            assert!(
                matches!(err, PsuError::ProtocolConsistency { register: "status byte", .. }),
                "response = {response}, err = {err:?}"
            );
        }
    }

    #[test]
    fn non_numeric_register_is_a_parse_error() {
        let mut transport = ScriptedTransport::default().respond("*STB?", &["garbage"]);
        let err = run_cascade(&mut transport, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PsuError::ProtocolParse(_)));
    }

    #[test]
    fn limit_events_survive_a_fatal_event_status() {
        // STB 0x21: channel-1 limit event and event status together.
        let mut transport = ScriptedTransport::default()
            .respond("*STB?", &["33"])
            .respond("LSR1?", &["4"])
            .respond("*ESR?", &["16"])
            .respond("EER?", &["104"]);
        let mut events = Vec::new();
        let err = run_cascade(&mut transport, &mut events).unwrap_err();

        assert!(matches!(err, PsuError::DeviceExecution { code: 104, .. }));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to_string(), "CH1 over voltage trip occurred");
    }

    #[test]
    fn message_table_spot_checks() {
        assert_eq!(
            execution_error_message(100),
            Some("100: Range error. Input value invalid")
        );
        assert_eq!(
            execution_error_message(200),
            Some("200: Read only, interface is locked")
        );
        assert_eq!(execution_error_message(7), Some("7: Internal hardware error"));
        assert_eq!(execution_error_message(105), None);
    }
}
