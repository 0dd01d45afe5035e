//! Process-wide registry of open instruments.
//!
//! The registry exists so that a shutdown hook can enumerate "every
//! instrument still open" without callers threading their handles around.
//! It holds weak references only: instrument lifetime belongs to the
//! callers, and explicit `close()` is the contract. Pruning entries whose
//! instrument was dropped without a close is a safety net, not a release
//! mechanism.
//!
//! Entries are added when an instrument finishes opening and removed when
//! its close completes.

use crate::instrument::Instrument;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

static REGISTRY: Lazy<InstrumentRegistry> = Lazy::new(InstrumentRegistry::new);

/// The process-wide registry instance.
pub fn global() -> &'static InstrumentRegistry {
    &REGISTRY
}

struct Entries {
    next_id: u64,
    by_id: HashMap<u64, Weak<dyn Instrument>>,
}

/// Weakly-held collection of live instrument handles.
pub struct InstrumentRegistry {
    entries: Mutex<Entries>,
}

impl InstrumentRegistry {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                next_id: 1,
                by_id: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a handle, returning the id to pass to [`InstrumentRegistry::remove`].
    pub(crate) fn add(&self, handle: Weak<dyn Instrument>) -> u64 {
        let mut entries = self.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.by_id.insert(id, handle);
        id
    }

    /// Removes the entry for `id`; removing twice is harmless.
    pub(crate) fn remove(&self, id: u64) {
        self.lock().by_id.remove(&id);
    }

    /// Upgrades every live entry, pruning those whose instrument is gone.
    pub fn open_instruments(&self) -> Vec<Arc<dyn Instrument>> {
        let mut entries = self.lock();
        entries.by_id.retain(|_, weak| weak.strong_count() > 0);
        entries.by_id.values().filter_map(Weak::upgrade).collect()
    }

    /// Number of live entries (dead ones are pruned first).
    pub fn len(&self) -> usize {
        self.open_instruments().len()
    }

    /// Whether no instruments are currently open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an instrument with this name is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.open_instruments()
            .iter()
            .any(|instrument| instrument.name() == name)
    }
}
