//! System validation and bootloader invariants.

mod helpers;

use std::fs;

use helpers::{meta_with, TestEnv};

use hammer_core::bootloader;
use hammer_core::error::HammerError;
use hammer_core::metadata::{self, STATUS_BOOTED, STATUS_BROKEN, STATUS_PREVIOUS, STATUS_READY};
use hammer_core::paths::Layout;
use hammer_core::snapshot;
use hammer_core::transaction;

#[test]
fn validation_fails_without_a_deployments_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());

    let err = transaction::validate_system(&layout).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HammerError>(),
        Some(HammerError::Validation(msg)) if msg.contains("deployments directory")
    ));
}

#[test]
fn validation_fails_when_the_tree_is_not_btrfs() {
    let env = TestEnv::new();
    env.make_deployment(
        "hammer-20250101000000",
        &meta_with("2025-01-01T00:00:00Z", STATUS_BOOTED, "6.1"),
    );
    env.set_current("hammer-20250101000000");

    // A plain directory tree has no filesystem UUID to discover.
    let err = transaction::validate_system(&env.layout).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HammerError>(),
        Some(HammerError::Validation(_))
    ));
}

#[test]
fn current_basename_resolves_through_the_symlink() {
    let env = TestEnv::new();
    env.make_deployment(
        "hammer-20250101000000",
        &meta_with("2025-01-01T00:00:00Z", STATUS_BOOTED, "6.1"),
    );
    env.set_current("hammer-20250101000000");

    assert_eq!(
        env.layout.current_basename().unwrap(),
        "hammer-20250101000000"
    );
}

#[test]
fn missing_current_symlink_is_a_validation_error() {
    let env = TestEnv::new();

    let err = env.layout.current_basename().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HammerError>(),
        Some(HammerError::Validation(msg)) if msg.contains("current deployment symlink")
    ));
}

#[test]
fn boot_menu_references_only_ready_and_booted_deployments() {
    let env = TestEnv::new();
    for (name, created, status) in [
        ("hammer-20250101000000", "2025-01-01T00:00:00Z", STATUS_PREVIOUS),
        ("hammer-20250102000000", "2025-01-02T00:00:00Z", STATUS_BROKEN),
        ("hammer-20250103000000", "2025-01-03T00:00:00Z", STATUS_BOOTED),
        ("hammer-20250104000000", "2025-01-04T00:00:00Z", STATUS_READY),
    ] {
        env.make_deployment(name, &meta_with(created, status, "6.1.0-18-amd64"));
    }

    let mut records = Vec::new();
    for name in snapshot::list_deployments(&env.layout).unwrap() {
        let meta = metadata::read_meta(&env.layout.deployment_path(&name)).unwrap();
        records.push((name, meta));
    }

    let entries = bootloader::select_entries(&records);
    let staged = env.layout.deployment_path("hammer-20250104000000");
    bootloader::write_fragment(&staged, &entries, "11111111-2222-3333-4444-555555555555").unwrap();

    let fragment =
        fs::read_to_string(staged.join(bootloader::FRAGMENT_RELPATH)).unwrap();
    assert!(fragment.contains("HammerOS (hammer-20250104000000)"));
    assert!(fragment.contains("HammerOS (hammer-20250103000000)"));
    assert!(!fragment.contains("hammer-20250101000000"));
    assert!(!fragment.contains("hammer-20250102000000"));
    assert_eq!(fragment.matches("menuentry").count(), 2);
}

#[test]
fn metadata_updates_keep_foreign_annotations() {
    let env = TestEnv::new();
    let path = env.make_deployment(
        "hammer-20250101000000",
        &meta_with("2025-01-01T00:00:00Z", STATUS_READY, "6.1"),
    );

    // Simulate a newer tool annotating the record.
    metadata::update_meta(&path, &[("pin", "true")]).unwrap();
    metadata::set_status_previous(&path, "manual").unwrap();

    let meta = metadata::read_meta(&path).unwrap();
    assert_eq!(meta.status, STATUS_PREVIOUS);
    assert_eq!(meta.rollback_reason.as_deref(), Some("manual"));
    assert_eq!(meta.extra.get("pin").map(String::as_str), Some("true"));
}
