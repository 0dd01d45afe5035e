//! Shutdown coordinator behavior against the live registry.
//!
//! Everything here touches process-global state, so the tests run serially.

mod common;

use common::open_fake;
use cpx400dp::{registry, Instrument, PsuError, ShutdownCoordinator};
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn run_closes_every_registered_instrument() {
    let (_fa, a) = open_fake("shutdown-a", 2);
    let (_fb, b) = open_fake("shutdown-b", 2);
    assert!(registry::global().contains("shutdown-a"));
    assert!(registry::global().contains("shutdown-b"));

    let coordinator = ShutdownCoordinator::new();
    coordinator.run(Duration::from_secs(5)).unwrap();

    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(!registry::global().contains("shutdown-a"));
    assert!(!registry::global().contains("shutdown-b"));
}

#[test]
#[serial]
fn expired_deadline_reports_shutdown_timeout() {
    let (_fake, psu) = open_fake("shutdown-deadline", 2);

    let coordinator = ShutdownCoordinator::new();
    let err = coordinator.run(Duration::ZERO).unwrap_err();
    assert!(matches!(err, PsuError::ShutdownTimeout));

    // The instrument never got its turn.
    assert!(!psu.is_closed());
    psu.close().unwrap();
}

#[test]
#[serial]
fn sequential_runs_are_allowed() {
    let coordinator = ShutdownCoordinator::new();
    let (_fake, psu) = open_fake("shutdown-repeat", 2);

    coordinator.run(Duration::from_secs(5)).unwrap();
    assert!(psu.is_closed());

    // The guard only blocks overlapping runs; a later run is fine.
    coordinator.run(Duration::from_secs(5)).unwrap();
}

#[test]
#[serial]
fn run_with_nothing_open_succeeds() {
    assert!(registry::global().is_empty());
    ShutdownCoordinator::new()
        .run(Duration::from_millis(1))
        .unwrap();
}
