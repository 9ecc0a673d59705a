//! Retention policy: bounded deletion of old deployments.

use anyhow::Result;

use crate::lock::HammerLock;
use crate::metadata;
use crate::paths::Layout;
use crate::snapshot;

/// How many deployments the sweep keeps.
pub const KEEP_DEPLOYMENTS: usize = 5;

/// Deployments eligible for deletion: everything but the newest `keep`,
/// minus the current deployment and the one named by the pending marker.
///
/// Names embed the creation timestamp, so lexical order is chronological.
pub fn retention_candidates(
    deployments: &[String],
    keep: usize,
    current: Option<&str>,
    pending: Option<&str>,
) -> Vec<String> {
    if deployments.len() <= keep {
        return Vec::new();
    }

    let mut sorted = deployments.to_vec();
    sorted.sort();
    sorted.truncate(deployments.len() - keep);
    sorted
        .into_iter()
        .filter(|name| Some(name.as_str()) != current)
        .filter(|name| Some(name.as_str()) != pending)
        .collect()
}

/// Delete excess old deployments. Individual delete failures are logged and
/// do not abort the sweep. Returns how many deployments were removed.
pub fn clean(layout: &Layout) -> Result<usize> {
    let _lock = HammerLock::acquire(layout)?;

    let deployments = snapshot::list_deployments(layout)?;
    let current = layout.current_basename().ok();
    let pending = metadata::read_pending(layout).unwrap_or_default();

    let candidates = retention_candidates(
        &deployments,
        KEEP_DEPLOYMENTS,
        current.as_deref(),
        pending.as_deref(),
    );

    let mut deleted = 0;
    for name in candidates {
        let path = layout.deployment_path(&name);
        match snapshot::delete_subvolume(&path) {
            Ok(()) => {
                tracing::info!(deployment = %name, "deployment deleted");
                deleted += 1;
            }
            Err(e) => {
                tracing::warn!(deployment = %name, "failed to delete deployment: {e:#}");
                eprintln!("Failed to delete deployment {name}: {e:#}");
            }
        }
    }
    Ok(deleted)
}
