//! Metadata store: per-deployment records and the pending-transaction marker.
//!
//! Each deployment carries a flat string-to-string record at `meta.json`
//! inside its tree. Unknown keys are preserved across updates so newer
//! tooling can annotate deployments without older binaries destroying the
//! annotations.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HammerError;
use crate::paths::Layout;
use crate::snapshot;

pub const STATUS_READY: &str = "ready";
pub const STATUS_BOOTED: &str = "booted";
pub const STATUS_PREVIOUS: &str = "previous";
pub const STATUS_BROKEN: &str = "broken";

pub const META_FILENAME: &str = "meta.json";

/// The per-deployment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMeta {
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub system_version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
    /// Keys this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl DeploymentMeta {
    /// A fresh record stamped with the construction time.
    pub fn new(
        action: &str,
        parent: &str,
        kernel: &str,
        system_version: &str,
        status: &str,
    ) -> Self {
        Self {
            created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            action: action.to_string(),
            parent: parent.to_string(),
            kernel: kernel.to_string(),
            system_version: system_version.to_string(),
            status: status.to_string(),
            rollback_reason: None,
            extra: BTreeMap::new(),
        }
    }
}

pub fn meta_path(deployment: &Path) -> PathBuf {
    deployment.join(META_FILENAME)
}

pub fn read_meta(deployment: &Path) -> Result<DeploymentMeta> {
    let path = meta_path(deployment);
    let contents = fs::read_to_string(&path)
        .map_err(|e| HammerError::Metadata(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| HammerError::Metadata(format!("cannot parse {}: {e}", path.display())).into())
}

pub fn write_meta(deployment: &Path, meta: &DeploymentMeta) -> Result<()> {
    let path = meta_path(deployment);
    let contents = serde_json::to_string_pretty(meta)
        .map_err(|e| HammerError::Metadata(format!("cannot serialize metadata: {e}")))?;
    fs::write(&path, contents + "\n")
        .map_err(|e| HammerError::Metadata(format!("cannot write {}: {e}", path.display())).into())
}

/// Merge `patch` onto the existing record. Supplied keys overwrite, all
/// other keys are untouched.
pub fn update_meta(deployment: &Path, patch: &[(&str, &str)]) -> Result<()> {
    let path = meta_path(deployment);
    let contents = fs::read_to_string(&path)
        .map_err(|e| HammerError::Metadata(format!("cannot read {}: {e}", path.display())))?;
    let mut record: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&contents)
        .map_err(|e| HammerError::Metadata(format!("cannot parse {}: {e}", path.display())))?;

    for (key, value) in patch {
        record.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    let contents = serde_json::to_string_pretty(&record)
        .map_err(|e| HammerError::Metadata(format!("cannot serialize metadata: {e}")))?;
    fs::write(&path, contents + "\n")
        .map_err(|e| HammerError::Metadata(format!("cannot write {}: {e}", path.display())).into())
}

/// Run a metadata update with the deployment temporarily writable.
///
/// Sealed deployments carry their record inside the read-only tree, so
/// status transitions toggle the ro property around the write. Toggle
/// failures are logged, not raised; the write itself decides the outcome.
fn with_writable<F>(deployment: &Path, update: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let was_readonly = snapshot::is_readonly(deployment).unwrap_or(false);
    if was_readonly {
        if let Err(e) = snapshot::set_readonly(deployment, false) {
            tracing::warn!(deployment = %deployment.display(), "cannot unseal for update: {e:#}");
        }
    }
    let result = update();
    if was_readonly {
        if let Err(e) = snapshot::set_readonly(deployment, true) {
            tracing::warn!(deployment = %deployment.display(), "cannot reseal after update: {e:#}");
        }
    }
    result
}

pub fn set_status_booted(deployment: &Path) -> Result<()> {
    with_writable(deployment, || {
        update_meta(deployment, &[("status", STATUS_BOOTED)])
    })
}

pub fn set_status_broken(deployment: &Path, reason: &str) -> Result<()> {
    with_writable(deployment, || {
        update_meta(
            deployment,
            &[("status", STATUS_BROKEN), ("rollback_reason", reason)],
        )
    })
}

pub fn set_status_previous(deployment: &Path, reason: &str) -> Result<()> {
    with_writable(deployment, || {
        update_meta(
            deployment,
            &[("status", STATUS_PREVIOUS), ("rollback_reason", reason)],
        )
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingMarker {
    deployment: String,
}

/// Record an in-flight commit naming the staged deployment. The marker is
/// flushed to disk before the caller performs the default-subvolume switch.
pub fn write_pending(layout: &Layout, deployment_name: &str) -> Result<()> {
    let marker = PendingMarker {
        deployment: deployment_name.to_string(),
    };
    let contents = serde_json::to_string(&marker)
        .map_err(|e| HammerError::Metadata(format!("cannot serialize marker: {e}")))?;

    let path = &layout.transaction_marker;
    let mut file = File::create(path)
        .map_err(|e| HammerError::Metadata(format!("cannot create {}: {e}", path.display())))?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| HammerError::Metadata(format!("cannot write {}: {e}", path.display())).into())
}

/// Name of the deployment with an unconfirmed commit, if any.
pub fn read_pending(layout: &Layout) -> Result<Option<String>> {
    let path = &layout.transaction_marker;
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(
                HammerError::Metadata(format!("cannot read {}: {e}", path.display())).into(),
            )
        }
    };
    let marker: PendingMarker = serde_json::from_str(&contents)
        .map_err(|e| HammerError::Metadata(format!("cannot parse {}: {e}", path.display())))?;
    Ok(Some(marker.deployment))
}

pub fn clear_pending(layout: &Layout) -> Result<()> {
    match fs::remove_file(&layout.transaction_marker) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HammerError::Metadata(format!(
            "cannot remove {}: {e}",
            layout.transaction_marker.display()
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let meta = DeploymentMeta::new(
            "install vim",
            "hammer-20250101000000",
            "6.1.0-18-amd64",
            "deadbeef",
            STATUS_READY,
        );
        write_meta(dir.path(), &meta).unwrap();
        let read = read_meta(dir.path()).unwrap();
        assert_eq!(read, meta);
    }

    #[test]
    fn rollback_reason_is_omitted_when_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let meta = DeploymentMeta::new("deploy", "hammer-a", "6.1", "abc", STATUS_READY);
        write_meta(dir.path(), &meta).unwrap();

        let raw = fs::read_to_string(meta_path(dir.path())).unwrap();
        assert!(!raw.contains("rollback_reason"));
    }

    #[test]
    fn update_preserves_unknown_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            meta_path(dir.path()),
            r#"{"created":"2025-01-01T00:00:00Z","status":"ready","pinned":"yes"}"#,
        )
        .unwrap();

        update_meta(dir.path(), &[("status", STATUS_PREVIOUS)]).unwrap();

        let meta = read_meta(dir.path()).unwrap();
        assert_eq!(meta.status, STATUS_PREVIOUS);
        assert_eq!(meta.created, "2025-01-01T00:00:00Z");
        assert_eq!(meta.extra.get("pinned").map(String::as_str), Some("yes"));
    }

    #[test]
    fn status_shorthands_set_reason() {
        let dir = tempfile::TempDir::new().unwrap();
        let meta = DeploymentMeta::new("update", "hammer-a", "6.1", "abc", STATUS_READY);
        write_meta(dir.path(), &meta).unwrap();

        set_status_broken(dir.path(), "sanity check failed").unwrap();
        let read = read_meta(dir.path()).unwrap();
        assert_eq!(read.status, STATUS_BROKEN);
        assert_eq!(read.rollback_reason.as_deref(), Some("sanity check failed"));
    }

    #[test]
    fn pending_marker_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = Layout::rooted(dir.path());
        fs::create_dir_all(&layout.btrfs_top).unwrap();

        assert_eq!(read_pending(&layout).unwrap(), None);
        write_pending(&layout, "hammer-20250102000000").unwrap();
        assert_eq!(
            read_pending(&layout).unwrap().as_deref(),
            Some("hammer-20250102000000")
        );
        clear_pending(&layout).unwrap();
        assert_eq!(read_pending(&layout).unwrap(), None);
        // Clearing twice is not an error.
        clear_pending(&layout).unwrap();
    }

    #[test]
    fn marker_format_is_a_single_key_object() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = Layout::rooted(dir.path());
        fs::create_dir_all(&layout.btrfs_top).unwrap();

        write_pending(&layout, "hammer-x").unwrap();
        let raw = fs::read_to_string(&layout.transaction_marker).unwrap();
        assert_eq!(raw, r#"{"deployment":"hammer-x"}"#);
    }
}
