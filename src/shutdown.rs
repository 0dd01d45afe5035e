//! Deadline-bounded shutdown of every open instrument.
//!
//! The hosting application wires [`ShutdownCoordinator::run`] into whatever
//! interruption mechanism it uses (a Ctrl-C handler, a service stop hook).
//! The coordinator owns two pieces of policy the hook itself should not:
//! a guard so a second interruption cannot re-enter a shutdown already in
//! progress, and a cooperative deadline so a wedged instrument cannot hang
//! process exit forever.
//!
//! Closing continues past individual failures; everything that went wrong
//! is reported at the end, aggregated if necessary.

use crate::error::{PsuError, PsuResult};
use crate::registry;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One-at-a-time close-everything hook.
pub struct ShutdownCoordinator {
    in_progress: AtomicBool,
}

/// Clears the in-progress flag on every exit path, including panics in a
/// close implementation.
struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ShutdownCoordinator {
    /// Creates a coordinator with no shutdown in progress.
    pub const fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
        }
    }

    /// Closes every registered instrument, giving up once `deadline` has
    /// elapsed.
    ///
    /// A second call while one is already running is a logged no-op, so a
    /// repeated interrupt cannot re-enter the close sequence. Once the run
    /// finishes (or times out) the guard clears and normal handling resumes.
    ///
    /// # Errors
    ///
    /// - [`PsuError::ShutdownTimeout`] if the deadline expired with
    ///   instruments still open.
    /// - A single close error, or [`PsuError::ShutdownFailed`] aggregating
    ///   several, if closes failed along the way.
    pub fn run(&self, deadline: Duration) -> PsuResult<()> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already in progress; ignoring repeated request");
            return Ok(());
        }
        let _guard = ClearOnDrop(&self.in_progress);
        close_all(deadline)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn close_all(deadline: Duration) -> PsuResult<()> {
    let started = Instant::now();
    let instruments = registry::global().open_instruments();
    if instruments.is_empty() {
        return Ok(());
    }
    info!(
        "Closing {} open instrument(s) within {:?}",
        instruments.len(),
        deadline
    );

    let mut failures = Vec::new();
    for instrument in instruments {
        if started.elapsed() >= deadline {
            warn!(
                "Shutdown deadline expired with '{}' still open",
                instrument.name()
            );
            failures.push(PsuError::ShutdownTimeout);
            break;
        }
        if let Err(e) = instrument.close() {
            warn!("Failed to close '{}': {e}", instrument.name());
            failures.push(e);
        }
    }

    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(PsuError::ShutdownFailed(failures)),
    }
}
