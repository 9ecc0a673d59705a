//! Snapshot store: CRUD over BTRFS subvolumes.
//!
//! Every operation maps to a `btrfs` invocation; a non-zero exit is surfaced
//! as `HammerError::Snapshot` carrying the captured stderr.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;

use crate::error::HammerError;
use crate::paths::{Layout, DEPLOYMENT_PREFIX};
use crate::process::{self, CommandResult};

fn btrfs(args: &[&OsStr]) -> Result<CommandResult> {
    process::run("btrfs", args.iter().copied())
}

fn check(result: CommandResult, what: &str) -> Result<CommandResult> {
    if result.success() {
        Ok(result)
    } else {
        Err(HammerError::Snapshot(format!("{}: {}", what, result.stderr_trimmed())).into())
    }
}

/// Deployment name for a snapshot taken now: `hammer-YYYYMMDDhhmmss`.
fn timestamp_name() -> String {
    format!(
        "{}{}",
        DEPLOYMENT_PREFIX,
        Local::now().format("%Y%m%d%H%M%S")
    )
}

/// Resolve a same-second name collision by appending a counter suffix.
pub fn disambiguate_name(dir: &Path, base: &str) -> String {
    if !dir.join(base).exists() {
        return base.to_string();
    }
    let mut counter = 2;
    loop {
        let candidate = format!("{}-{}", base, counter);
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Snapshot `src` into a fresh deployment under the deployments directory.
///
/// With `writable` the snapshot is left writable for the staging phase;
/// otherwise it is created read-only.
pub fn create_snapshot(layout: &Layout, src: &Path, writable: bool) -> Result<PathBuf> {
    fs::create_dir_all(&layout.deployments_dir).map_err(|e| {
        HammerError::Snapshot(format!(
            "cannot create {}: {e}",
            layout.deployments_dir.display()
        ))
    })?;

    let name = disambiguate_name(&layout.deployments_dir, &timestamp_name());
    let dest = layout.deployment_path(&name);

    let mut args: Vec<&OsStr> = vec![OsStr::new("subvolume"), OsStr::new("snapshot")];
    if !writable {
        args.push(OsStr::new("-r"));
    }
    args.push(src.as_os_str());
    args.push(dest.as_os_str());
    check(btrfs(&args)?, "snapshot creation failed")?;

    if writable {
        // The staged tree must be writable regardless of the source's
        // ro property.
        set_readonly(&dest, false)?;
    }

    tracing::info!(deployment = %name, src = %src.display(), "snapshot created");
    Ok(dest)
}

/// Delete a subvolume. Retention treats failures as non-fatal; that policy
/// lives with the caller.
pub fn delete_subvolume(path: &Path) -> Result<()> {
    check(
        btrfs(&[OsStr::new("subvolume"), OsStr::new("delete"), path.as_os_str()])?,
        "subvolume delete failed",
    )?;
    Ok(())
}

/// Make the subvolume the filesystem's default mount. This is the publish
/// step; the next boot lands here.
pub fn set_default_subvolume(layout: &Layout, path: &Path) -> Result<()> {
    let id = subvolume_id(path)?;
    check(
        btrfs(&[
            OsStr::new("subvolume"),
            OsStr::new("set-default"),
            OsStr::new(&id),
            layout.btrfs_top.as_os_str(),
        ])?,
        "set-default failed",
    )?;
    tracing::info!(subvolume = %path.display(), id = %id, "default subvolume switched");
    Ok(())
}

/// Toggle the `ro` property on a single subvolume.
pub fn set_readonly(path: &Path, readonly: bool) -> Result<()> {
    let value = if readonly { "true" } else { "false" };
    check(
        btrfs(&[
            OsStr::new("property"),
            OsStr::new("set"),
            OsStr::new("-ts"),
            path.as_os_str(),
            OsStr::new("ro"),
            OsStr::new(value),
        ])?,
        "property set failed",
    )?;
    Ok(())
}

/// Read the `ro` property of a subvolume.
pub fn is_readonly(path: &Path) -> Result<bool> {
    let result = check(
        btrfs(&[
            OsStr::new("property"),
            OsStr::new("get"),
            OsStr::new("-ts"),
            path.as_os_str(),
            OsStr::new("ro"),
        ])?,
        "property get failed",
    )?;
    Ok(result.stdout.contains("ro=true"))
}

/// Toggle `ro` on a subvolume and every subvolume nested beneath it.
pub fn set_readonly_recursive(layout: &Layout, path: &Path, readonly: bool) -> Result<()> {
    let nested = nested_subvolumes(layout, path)?;
    if readonly {
        for sub in &nested {
            set_readonly(sub, true)?;
        }
        set_readonly(path, true)
    } else {
        set_readonly(path, false)?;
        for sub in &nested {
            set_readonly(sub, false)?;
        }
        Ok(())
    }
}

/// Subvolumes nested under `path`, discovered by listing. Paths in the
/// listing are relative to the filesystem root.
fn nested_subvolumes(layout: &Layout, path: &Path) -> Result<Vec<PathBuf>> {
    let result = check(
        btrfs(&[
            OsStr::new("subvolume"),
            OsStr::new("list"),
            OsStr::new("-o"),
            path.as_os_str(),
        ])?,
        "subvolume list failed",
    )?;

    let mut subvolumes = Vec::new();
    for line in result.stdout.lines() {
        if let Some((_, rel)) = line.split_once(" path ") {
            subvolumes.push(layout.btrfs_top.join(rel.trim()));
        }
    }
    Ok(subvolumes)
}

/// Numeric subvolume ID, parsed from `btrfs subvolume show`.
pub fn subvolume_id(path: &Path) -> Result<String> {
    let result = check(
        btrfs(&[OsStr::new("subvolume"), OsStr::new("show"), path.as_os_str()])?,
        "subvolume show failed",
    )?;

    for line in result.stdout.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim() == "Subvolume ID" {
                return Ok(value.trim().to_string());
            }
        }
    }
    Err(HammerError::Snapshot(format!(
        "no subvolume ID in show output for {}",
        path.display()
    ))
    .into())
}

/// Filesystem UUID of the BTRFS volume holding the deployments.
pub fn filesystem_uuid(layout: &Layout) -> Result<String> {
    let result = check(
        btrfs(&[
            OsStr::new("filesystem"),
            OsStr::new("show"),
            layout.btrfs_top.as_os_str(),
        ])?,
        "filesystem show failed",
    )?;

    for line in result.stdout.lines() {
        if let Some((_, uuid)) = line.split_once("uuid:") {
            let uuid = uuid.trim();
            if !uuid.is_empty() {
                return Ok(uuid.to_string());
            }
        }
    }
    Err(HammerError::Snapshot(format!(
        "no uuid in filesystem show output for {}",
        layout.btrfs_top.display()
    ))
    .into())
}

/// Basenames of all deployments, sorted ascending. Names embed the creation
/// timestamp, so this order is also chronological.
pub fn list_deployments(layout: &Layout) -> Result<Vec<String>> {
    let entries = fs::read_dir(&layout.deployments_dir).map_err(|e| {
        HammerError::Snapshot(format!(
            "cannot list {}: {e}",
            layout.deployments_dir.display()
        ))
    })?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(DEPLOYMENT_PREFIX))
        .collect();
    names.sort();
    Ok(names)
}
