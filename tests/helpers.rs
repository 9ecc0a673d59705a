//! Shared test utilities for hammer-core tests.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use tempfile::TempDir;

use hammer_core::metadata::{self, DeploymentMeta};
use hammer_core::paths::Layout;

/// Test environment with the whole filesystem layout re-rooted into a
/// temporary directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for the lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub layout: Layout,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let layout = Layout::rooted(temp_dir.path());
        fs::create_dir_all(&layout.deployments_dir).expect("Failed to create deployments dir");

        Self {
            _temp_dir: temp_dir,
            layout,
        }
    }

    /// Create a deployment directory carrying the given metadata record.
    pub fn make_deployment(&self, name: &str, meta: &DeploymentMeta) -> PathBuf {
        let path = self.layout.deployment_path(name);
        fs::create_dir_all(&path).expect("Failed to create deployment dir");
        metadata::write_meta(&path, meta).expect("Failed to write deployment metadata");
        path
    }

    /// Create a deployment directory without any metadata.
    pub fn make_bare_deployment(&self, name: &str) -> PathBuf {
        let path = self.layout.deployment_path(name);
        fs::create_dir_all(&path).expect("Failed to create deployment dir");
        path
    }

    /// Point the current symlink at the named deployment.
    pub fn set_current(&self, name: &str) {
        let link = &self.layout.current_symlink;
        if link.symlink_metadata().is_ok() {
            fs::remove_file(link).expect("Failed to remove current symlink");
        }
        symlink(self.layout.deployment_path(name), link)
            .expect("Failed to create current symlink");
    }
}

/// A metadata record with a fixed creation time, for deterministic ordering.
pub fn meta_with(created: &str, status: &str, kernel: &str) -> DeploymentMeta {
    let mut meta = DeploymentMeta::new("deploy", "hammer-parent", kernel, "v0", status);
    meta.created = created.to_string();
    meta
}
