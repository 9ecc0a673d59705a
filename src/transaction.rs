//! Transaction engine: the prepare/commit/abort sequence behind every
//! mutating operation.
//!
//! A mutation never edits the running system. It snapshots the current
//! deployment writably, mutates the copy under chroot, validates it, and
//! only then publishes it as the default subvolume. The pending-transaction
//! marker brackets the publish so the next boot can tell a confirmed commit
//! from a bootloader fallback.

use std::cmp::Ordering;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::bootloader;
use crate::chroot::{self, ChrootMounts};
use crate::error::HammerError;
use crate::lock::HammerLock;
use crate::metadata::{self, DeploymentMeta, STATUS_READY};
use crate::paths::Layout;
use crate::sanity;
use crate::snapshot;

/// Every operation ends by inventorying packages and regenerating the
/// initramfs and grub configuration inside the staged tree.
const CHROOT_TRAILER: &str =
    "dpkg -l > /tmp/packages.list && update-initramfs -u -k all && update-grub";

const PACKAGES_LIST_RELPATH: &str = "tmp/packages.list";

/// A mutating operation on the system image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Install(String),
    Remove(String),
    Deploy,
    Update,
}

impl Operation {
    /// The `action` field recorded in the deployment metadata.
    pub fn action_label(&self) -> String {
        match self {
            Operation::Install(pkg) => format!("install {pkg}"),
            Operation::Remove(pkg) => format!("remove {pkg}"),
            Operation::Deploy => "deploy".to_string(),
            Operation::Update => "update".to_string(),
        }
    }

    /// The shell sequence run inside the chroot.
    fn chroot_script(&self) -> String {
        match self {
            Operation::Install(pkg) => format!(
                "apt update && apt install -y {pkg} && apt autoremove -y && {CHROOT_TRAILER}"
            ),
            Operation::Remove(pkg) => {
                format!("apt remove -y {pkg} && apt autoremove -y && {CHROOT_TRAILER}")
            }
            Operation::Update => format!(
                "apt update && apt upgrade -y -o Dpkg::Options::=\"--force-confold\" \
                 && apt autoremove -y && {CHROOT_TRAILER}"
            ),
            Operation::Deploy => CHROOT_TRAILER.to_string(),
        }
    }
}

/// Package names are embedded in a shell command line, so anything outside
/// the Debian package-name alphabet is rejected up front.
pub fn validate_package_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(HammerError::Validation(format!("invalid package name '{name}'")).into())
    }
}

/// Check the invariants a mutation relies on before touching anything.
pub fn validate_system(layout: &Layout) -> Result<()> {
    if !layout.deployments_dir.is_dir() {
        return Err(HammerError::Validation(format!(
            "deployments directory {} is missing",
            layout.deployments_dir.display()
        ))
        .into());
    }
    snapshot::filesystem_uuid(layout).map_err(|_| {
        HammerError::Validation(format!(
            "{} is not on a BTRFS filesystem",
            layout.btrfs_top.display()
        ))
    })?;

    let current = layout.current_target()?;
    if !current.is_dir() {
        return Err(HammerError::Validation(format!(
            "current symlink target {} does not exist",
            current.display()
        ))
        .into());
    }
    if !snapshot::is_readonly(&current)? {
        return Err(
            HammerError::Validation("current deployment is not read-only".to_string()).into(),
        );
    }
    Ok(())
}

/// Run a mutating operation end to end. Returns the path of the published
/// deployment.
///
/// On any failure after the snapshot exists, the staged deployment is
/// marked `broken` and the error propagates; the prior current remains the
/// default and the system stays bootable.
pub fn run_transaction(layout: &Layout, op: &Operation) -> Result<PathBuf> {
    if let Operation::Install(pkg) | Operation::Remove(pkg) = op {
        validate_package_name(pkg)?;
    }

    let _lock = HammerLock::acquire(layout)?;
    validate_system(layout)?;

    let current = layout.current_target()?;
    let parent = layout.current_basename()?;
    tracing::info!(action = %op.action_label(), parent = %parent, "transaction started");

    let staged = snapshot::create_snapshot(layout, &current, true)?;
    match stage_and_publish(layout, op, &parent, &staged) {
        Ok(()) => {
            tracing::info!(deployment = %staged.display(), "transaction committed");
            Ok(staged)
        }
        Err(err) => {
            abort_to_broken(layout, op, &parent, &staged, &err);
            Err(err)
        }
    }
}

fn stage_and_publish(layout: &Layout, op: &Operation, parent: &str, staged: &Path) -> Result<()> {
    let staged_name = deployment_basename(staged)?;
    metadata::write_pending(layout, &staged_name)?;

    let binds = ChrootMounts::bind(staged)?;
    match run_chroot_phase(op, staged) {
        // Deliberate unmount; the deployment cannot be sealed while bound.
        Ok(()) => binds.unmount()?,
        // The drop guard unwinds the binds without masking the error.
        Err(err) => {
            drop(binds);
            return Err(err);
        }
    }

    let kernel = detect_kernel(staged)?;
    sanity::check_deployment(staged, &kernel)?;
    let system_version = compute_system_version(staged)?;

    let meta = DeploymentMeta::new(
        &op.action_label(),
        parent,
        &kernel,
        &system_version,
        STATUS_READY,
    );
    metadata::write_meta(staged, &meta)?;

    write_boot_menu(layout, staged)?;

    snapshot::set_readonly(staged, true)?;
    snapshot::set_default_subvolume(layout, staged)?;
    replace_current_symlink(layout, staged)?;
    metadata::clear_pending(layout)?;
    Ok(())
}

/// Operation-specific probe, then the chroot command sequence.
fn run_chroot_phase(op: &Operation, staged: &Path) -> Result<()> {
    match op {
        Operation::Install(pkg) => {
            if package_installed(staged, pkg)? {
                return Err(HammerError::AlreadyInstalled(pkg.clone()).into());
            }
        }
        Operation::Remove(pkg) => {
            if !package_installed(staged, pkg)? {
                return Err(HammerError::NotInstalled(pkg.clone()).into());
            }
        }
        Operation::Deploy | Operation::Update => {}
    }

    let script = op.chroot_script();
    tracing::info!(%script, "running chroot command sequence");
    let result = chroot::chroot_sh(staged, &script)?;
    if !result.success() {
        return Err(HammerError::ChrootCommand(result.stderr_trimmed().to_string()).into());
    }
    Ok(())
}

fn package_installed(staged: &Path, pkg: &str) -> Result<bool> {
    Ok(chroot::chroot_exec(staged, "dpkg", &["-s", pkg])?.success())
}

/// Version of the newest kernel image installed in the staged tree.
fn detect_kernel(staged: &Path) -> Result<String> {
    let result = chroot::chroot_sh(staged, "dpkg -l | grep linux-image")?;
    if !result.success() {
        return Err(
            HammerError::Sanity("no linux-image package in staged deployment".to_string()).into(),
        );
    }
    newest_kernel_version(&result.stdout).ok_or_else(|| {
        HammerError::Sanity("no versioned linux-image package in staged deployment".to_string())
            .into()
    })
}

/// Pick the newest version among `linux-image-<version>` packages listed in
/// `dpkg -l` output. Meta packages without a leading version digit are
/// ignored.
pub fn newest_kernel_version(dpkg_output: &str) -> Option<String> {
    let mut versions: Vec<&str> = dpkg_output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|pkg| pkg.strip_prefix("linux-image-"))
        .filter(|v| v.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .collect();
    versions.sort_by(|a, b| compare_versions(a, b));
    versions.pop().map(str::to_string)
}

enum VersionChunk<'a> {
    Num(u64),
    Text(&'a str),
}

fn version_chunks(s: &str) -> Vec<VersionChunk<'_>> {
    let mut chunks = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits > 0 {
            let (num, tail) = rest.split_at(digits);
            chunks.push(VersionChunk::Num(num.parse().unwrap_or(u64::MAX)));
            rest = tail;
        } else {
            let text = rest.chars().take_while(|c| !c.is_ascii_digit()).count();
            let (chunk, tail) = rest.split_at(text);
            chunks.push(VersionChunk::Text(chunk));
            rest = tail;
        }
    }
    chunks
}

/// Numeric-aware ordering over version strings: digit runs compare as
/// numbers, everything else lexically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (av, bv) = (version_chunks(a), version_chunks(b));
    for pair in av.iter().zip(bv.iter()) {
        let ord = match pair {
            (VersionChunk::Num(m), VersionChunk::Num(n)) => m.cmp(n),
            (VersionChunk::Text(s), VersionChunk::Text(t)) => s.cmp(t),
            // A number sorts after text at the same position, so a longer
            // dotted version beats its prefix's suffix text.
            (VersionChunk::Num(_), VersionChunk::Text(_)) => Ordering::Greater,
            (VersionChunk::Text(_), VersionChunk::Num(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    av.len().cmp(&bv.len())
}

/// Digest of the package inventory the trailer wrote. The inventory file is
/// removed afterwards so that deployments built from identical inputs stay
/// bit-identical.
fn compute_system_version(staged: &Path) -> Result<String> {
    let list = staged.join(PACKAGES_LIST_RELPATH);
    let contents = fs::read(&list).map_err(|e| {
        HammerError::Metadata(format!("missing package inventory {}: {e}", list.display()))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&contents);
    let digest = hasher.finalize();

    fs::remove_file(&list).map_err(|e| {
        HammerError::Metadata(format!("cannot remove {}: {e}", list.display()))
    })?;

    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn write_boot_menu(layout: &Layout, staged: &Path) -> Result<()> {
    let mut records = Vec::new();
    for name in snapshot::list_deployments(layout)? {
        match metadata::read_meta(&layout.deployment_path(&name)) {
            Ok(meta) => records.push((name, meta)),
            Err(e) => tracing::warn!(
                deployment = %name,
                "deployment skipped in boot menu, metadata unreadable: {e:#}"
            ),
        }
    }
    let uuid = snapshot::filesystem_uuid(layout)?;
    bootloader::write_fragment(staged, &bootloader::select_entries(&records), &uuid)
}

/// Unlink-then-symlink replacement of the current pointer. Readers observe
/// either the old or the new target.
fn replace_current_symlink(layout: &Layout, target: &Path) -> Result<()> {
    let link = &layout.current_symlink;
    match fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove {}", link.display()));
        }
    }
    symlink(target, link)
        .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))
}

fn deployment_basename(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            HammerError::Validation(format!("{} has no basename", path.display())).into()
        })
}

/// Best-effort demotion of a failed staged deployment. Never raises; the
/// original error is what the caller reports.
fn abort_to_broken(
    layout: &Layout,
    op: &Operation,
    parent: &str,
    staged: &Path,
    err: &anyhow::Error,
) {
    tracing::error!(deployment = %staged.display(), "transaction aborted: {err:#}");

    let reason = err.to_string();
    let record = if metadata::meta_path(staged).exists() {
        metadata::set_status_broken(staged, &reason)
    } else {
        let mut meta = DeploymentMeta::new(
            &op.action_label(),
            parent,
            "",
            "",
            metadata::STATUS_BROKEN,
        );
        meta.rollback_reason = Some(reason);
        metadata::write_meta(staged, &meta)
    };
    if let Err(e) = record {
        tracing::warn!(deployment = %staged.display(), "cannot record broken status: {e:#}");
    }

    // No commit is in flight anymore; the marker only matters across the
    // default-subvolume switch, which was never reached.
    if let Err(e) = metadata::clear_pending(layout) {
        tracing::warn!("cannot clear pending marker: {e:#}");
    }
}

/// The Nth newest deployment other than the current one.
pub fn select_rollback_target(deployments: &[String], current: &str, n: usize) -> Result<String> {
    if n == 0 {
        return Err(HammerError::Validation("rollback depth must be at least 1".to_string()).into());
    }
    let mut others: Vec<&String> = deployments.iter().filter(|d| d.as_str() != current).collect();
    others.sort_by(|a, b| b.cmp(a));
    others
        .get(n - 1)
        .map(|s| s.to_string())
        .ok_or_else(|| HammerError::Validation("Not enough deployments for rollback".to_string()).into())
}

/// Roll back to the Nth newest deployment other than the current.
pub fn rollback(layout: &Layout, n: usize) -> Result<String> {
    let _lock = HammerLock::acquire(layout)?;
    validate_system(layout)?;

    let current = layout.current_basename()?;
    let deployments = snapshot::list_deployments(layout)?;
    let target = select_rollback_target(&deployments, &current, n)?;
    publish_existing(layout, &current, &target)?;
    Ok(target)
}

/// Switch to a named deployment, or to the previous one when no name is
/// given. Names are basenames resolved under the deployments directory.
pub fn switch_to(layout: &Layout, name: Option<&str>) -> Result<String> {
    let _lock = HammerLock::acquire(layout)?;
    validate_system(layout)?;

    let current = layout.current_basename()?;
    let target = match name {
        Some(name) => {
            if name == current {
                return Err(HammerError::Validation(format!(
                    "{name} is already the current deployment"
                ))
                .into());
            }
            if !layout.deployment_path(name).is_dir() {
                return Err(
                    HammerError::Validation(format!("Deployment {name} does not exist")).into(),
                );
            }
            name.to_string()
        }
        None => {
            let deployments = snapshot::list_deployments(layout)?;
            select_rollback_target(&deployments, &current, 1)?
        }
    };
    publish_existing(layout, &current, &target)?;
    Ok(target)
}

/// Make an already-sealed deployment the default and demote the outgoing
/// current to `previous`.
fn publish_existing(layout: &Layout, current_name: &str, target_name: &str) -> Result<()> {
    let target = layout.deployment_path(target_name);
    snapshot::set_default_subvolume(layout, &target)?;
    replace_current_symlink(layout, &target)?;
    metadata::set_status_previous(&layout.deployment_path(current_name), "manual")?;
    tracing::info!(from = current_name, to = target_name, "current deployment switched");
    Ok(())
}

/// Outcome of the first-boot reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The pending deployment is the one that booted; it is confirmed.
    Confirmed(String),
    /// The system booted something else; the pending deployment is broken.
    Fallback(String),
}

/// Reconcile the pending-transaction marker against the actually-booted
/// deployment. The marker is removed in every case.
pub fn reconcile_pending(layout: &Layout) -> Result<Option<Reconciliation>> {
    let Some(pending) = metadata::read_pending(layout)? else {
        return Ok(None);
    };

    let current = layout.current_basename()?;
    let deployment = layout.deployment_path(&pending);

    let (outcome, status_result) = if pending == current {
        let result = metadata::set_status_booted(&deployment);
        (Reconciliation::Confirmed(pending), result)
    } else if deployment.is_dir() {
        let result =
            metadata::set_status_broken(&deployment, "system booted fallback deployment");
        (Reconciliation::Fallback(pending), result)
    } else {
        tracing::warn!(deployment = %pending, "pending deployment no longer exists");
        (Reconciliation::Fallback(pending), Ok(()))
    };

    let clear_result = metadata::clear_pending(layout);
    status_result?;
    clear_result?;

    tracing::info!(?outcome, "pending transaction reconciled");
    Ok(Some(outcome))
}
