//! Shared fake transport for integration tests.
//!
//! `FakeTransport` is a scripted stand-in for the serial link: writes are
//! recorded, and responses come from per-command queues (consumed once) or
//! defaults (repeated). Cloning shares the underlying script and log, so a
//! test can keep one handle while the instrument owns the other.

use cpx400dp::transport::{FlushStats, Transport};
use cpx400dp::{Cpx400dp, PsuError, PsuResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct FakeInner {
    queued: HashMap<String, VecDeque<String>>,
    defaults: HashMap<String, String>,
    writes: Vec<String>,
    pending: Option<String>,
}

/// Scripted, recording transport.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeTransport {
    /// A fake that can answer the full open handshake for up to 4 channels.
    pub fn with_handshake() -> Self {
        let fake = Self::default();
        fake.set_default("*IDN?", "THURLBY,CPX400DP,12345,1.03");
        fake.set_default("*STB?", "0");
        fake.set_default("*SRE?", "255");
        fake.set_default("*ESE?", "255");
        for n in 1..=4 {
            fake.set_default(&format!("LSE{n}?"), "255");
        }
        fake
    }

    fn lock(&self) -> MutexGuard<'_, FakeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a one-shot response for `command`, consumed before defaults.
    pub fn enqueue(&self, command: &str, response: &str) {
        self.lock()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(response.to_string());
    }

    /// Sets (or replaces) the repeating default response for `command`.
    pub fn set_default(&self, command: &str, response: &str) {
        self.lock()
            .defaults
            .insert(command.to_string(), response.to_string());
    }

    /// Removes the default response for `command`, making it time out.
    pub fn remove_default(&self, command: &str) {
        self.lock().defaults.remove(command);
    }

    /// Every line written so far, terminators stripped.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    /// Forgets the recorded writes (commonly called right after open).
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

/// Set commands for these prefixes are echoed back in query form, the way
/// the real supply reports settings: writing `V1 12.345` makes a later
/// `V1?` answer `V1 12.345`.
fn echoes_in_query_form(head: &str) -> bool {
    ["OVP", "OCP", "OP", "V", "I"]
        .iter()
        .any(|prefix| head.strip_prefix(prefix).is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit())))
}

impl Transport for FakeTransport {
    fn write_line(&mut self, line: &str) -> PsuResult<()> {
        let command = line.trim_end().to_string();
        let mut inner = self.lock();

        if let Some((head, value)) = command.split_once(' ') {
            if echoes_in_query_form(head) {
                inner
                    .defaults
                    .insert(format!("{head}?"), format!("{head} {value}"));
            }
        }

        inner.pending = inner
            .queued
            .get_mut(&command)
            .and_then(|queue| queue.pop_front())
            .or_else(|| inner.defaults.get(&command).cloned());
        inner.writes.push(command);
        Ok(())
    }

    fn read_line(&mut self) -> PsuResult<String> {
        self.lock().pending.take().ok_or(PsuError::TransportTimeout)
    }

    fn bytes_pending(&mut self) -> PsuResult<u32> {
        Ok(self.lock().pending.as_ref().map_or(0, |p| p.len() as u32))
    }

    fn clear_input(&mut self) -> PsuResult<()> {
        self.lock().pending = None;
        Ok(())
    }

    fn flush(&mut self) -> PsuResult<FlushStats> {
        let mut inner = self.lock();
        let stats = FlushStats {
            input_bytes: inner.pending.as_ref().map_or(0, |p| p.len() as u32),
            output_bytes: 0,
        };
        inner.pending = None;
        Ok(stats)
    }

    fn location(&self) -> &str {
        "fake"
    }
}

/// Opens an instrument over a fresh handshake-capable fake, clearing the
/// write log so tests only see their own traffic.
pub fn open_fake(name: &str, channels: u8) -> (FakeTransport, Arc<Cpx400dp>) {
    let fake = FakeTransport::with_handshake();
    let psu = Cpx400dp::with_transport(name, Box::new(fake.clone()), channels)
        .expect("open over fake transport");
    fake.clear_writes();
    (fake, psu)
}
