//! First-boot reconciliation of the pending-transaction marker.
//!
//! These tests exercise the crash-safety story: after a reboot, the marker
//! tells the engine whether the published deployment actually booted.

mod helpers;

use helpers::{meta_with, TestEnv};

use hammer_core::metadata::{self, STATUS_BOOTED, STATUS_BROKEN, STATUS_READY};
use hammer_core::transaction::{reconcile_pending, Reconciliation};

#[test]
fn confirmed_boot_marks_deployment_booted() {
    let env = TestEnv::new();
    let staged = env.make_deployment(
        "hammer-20250102000000",
        &meta_with("2025-01-02T00:00:00Z", STATUS_READY, "6.1"),
    );
    env.set_current("hammer-20250102000000");
    metadata::write_pending(&env.layout, "hammer-20250102000000").unwrap();

    let outcome = reconcile_pending(&env.layout).unwrap();

    assert_eq!(
        outcome,
        Some(Reconciliation::Confirmed("hammer-20250102000000".into()))
    );
    assert_eq!(metadata::read_meta(&staged).unwrap().status, STATUS_BOOTED);
    assert_eq!(metadata::read_pending(&env.layout).unwrap(), None);
}

#[test]
fn fallback_boot_marks_pending_deployment_broken() {
    let env = TestEnv::new();
    let prior = env.make_deployment(
        "hammer-20250101000000",
        &meta_with("2025-01-01T00:00:00Z", STATUS_BOOTED, "6.1"),
    );
    let staged = env.make_deployment(
        "hammer-20250102000000",
        &meta_with("2025-01-02T00:00:00Z", STATUS_READY, "6.1"),
    );
    // The bootloader fell back to the prior deployment.
    env.set_current("hammer-20250101000000");
    metadata::write_pending(&env.layout, "hammer-20250102000000").unwrap();

    let outcome = reconcile_pending(&env.layout).unwrap();

    assert_eq!(
        outcome,
        Some(Reconciliation::Fallback("hammer-20250102000000".into()))
    );
    let broken = metadata::read_meta(&staged).unwrap();
    assert_eq!(broken.status, STATUS_BROKEN);
    assert!(broken.rollback_reason.is_some());
    // The deployment that did boot is untouched.
    assert_eq!(metadata::read_meta(&prior).unwrap().status, STATUS_BOOTED);
    assert_eq!(metadata::read_pending(&env.layout).unwrap(), None);
}

#[test]
fn no_marker_means_nothing_to_reconcile() {
    let env = TestEnv::new();
    env.make_deployment(
        "hammer-20250101000000",
        &meta_with("2025-01-01T00:00:00Z", STATUS_BOOTED, "6.1"),
    );
    env.set_current("hammer-20250101000000");

    assert_eq!(reconcile_pending(&env.layout).unwrap(), None);
}

#[test]
fn marker_naming_a_vanished_deployment_is_cleared() {
    let env = TestEnv::new();
    env.make_deployment(
        "hammer-20250101000000",
        &meta_with("2025-01-01T00:00:00Z", STATUS_BOOTED, "6.1"),
    );
    env.set_current("hammer-20250101000000");
    metadata::write_pending(&env.layout, "hammer-gone").unwrap();

    let outcome = reconcile_pending(&env.layout).unwrap();

    assert_eq!(outcome, Some(Reconciliation::Fallback("hammer-gone".into())));
    assert_eq!(metadata::read_pending(&env.layout).unwrap(), None);
}

#[test]
fn marker_is_removed_even_when_the_status_update_fails() {
    let env = TestEnv::new();
    // Deployment exists but carries no metadata, so the status update fails.
    env.make_bare_deployment("hammer-20250102000000");
    env.set_current("hammer-20250102000000");
    metadata::write_pending(&env.layout, "hammer-20250102000000").unwrap();

    let result = reconcile_pending(&env.layout);

    assert!(result.is_err());
    assert_eq!(metadata::read_pending(&env.layout).unwrap(), None);
}
