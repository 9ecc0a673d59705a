//! Fixed filesystem locations for the deployment engine.
//!
//! Every path the engine touches is derived from a [`Layout`] so that
//! integration tests can re-root the whole tree into a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::HammerError;

/// All deployment subvolumes are named `hammer-<timestamp>`.
pub const DEPLOYMENT_PREFIX: &str = "hammer-";

/// The filesystem locations the engine operates on.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Top of the BTRFS filesystem holding the deployments.
    pub btrfs_top: PathBuf,
    /// Directory containing all deployment subvolumes.
    pub deployments_dir: PathBuf,
    /// Symlink naming the deployment the next boot will select.
    pub current_symlink: PathBuf,
    /// Pending-transaction marker file.
    pub transaction_marker: PathBuf,
    /// Exclusive lock serializing mutating operations.
    pub lock_file: PathBuf,
    /// Append-only core log.
    pub log_file: PathBuf,
}

impl Layout {
    /// The fixed system paths used by a real installation.
    pub fn system() -> Self {
        Self::rooted(Path::new("/"))
    }

    /// The same tree re-rooted under `root`. Used by tests.
    pub fn rooted(root: &Path) -> Self {
        let btrfs_top = root.join("btrfs-root");
        Self {
            deployments_dir: btrfs_top.join("deployments"),
            current_symlink: btrfs_top.join("current"),
            transaction_marker: btrfs_top.join("hammer-transaction"),
            lock_file: root.join("run/hammer.lock"),
            log_file: root.join("usr/lib/HackerOS/hammer/logs/hammer-core.log"),
            btrfs_top,
        }
    }

    /// Absolute path of the deployment with the given basename.
    pub fn deployment_path(&self, name: &str) -> PathBuf {
        self.deployments_dir.join(name)
    }

    /// Resolve the current symlink to the active deployment path.
    pub fn current_target(&self) -> Result<PathBuf> {
        fs::read_link(&self.current_symlink).map_err(|_| {
            HammerError::Validation("current deployment symlink is missing".to_string()).into()
        })
    }

    /// Basename of the active deployment.
    pub fn current_basename(&self) -> Result<String> {
        let target = self.current_target()?;
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                HammerError::Validation(format!(
                    "current symlink target {} has no basename",
                    target.display()
                ))
                .into()
            })
    }
}
