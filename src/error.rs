//! Error taxonomy for the deployment engine.
//!
//! Components raise these through `anyhow`, so callers keep the context chain
//! while the dispatcher can still match on the kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HammerError {
    #[error("This command must be run as root")]
    NotRoot,

    #[error("Another hammer operation is already in progress")]
    ConcurrentOperation,

    #[error("System validation failed: {0}")]
    Validation(String),

    #[error("btrfs operation failed: {0}")]
    Snapshot(String),

    #[error("Bind mount failed: {0}")]
    Mount(String),

    #[error("Command failed in chroot: {0}")]
    ChrootCommand(String),

    #[error("Package {0} is already installed in the system")]
    AlreadyInstalled(String),

    #[error("Package {0} is not installed in the system")]
    NotInstalled(String),

    #[error("Sanity check failed: {0}")]
    Sanity(String),

    #[error("Deployment metadata error: {0}")]
    Metadata(String),
}
