//! System-wide lock serializing mutating operations.
//!
//! The lock is advisory: it only protects cooperating hammer processes.
//! Acquisition is scoped, so the file is removed on every exit path.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::error::HammerError;
use crate::paths::Layout;

/// Held for the duration of a mutating operation. Dropping it releases
/// the lock.
#[derive(Debug)]
pub struct HammerLock {
    path: PathBuf,
}

impl HammerLock {
    /// Create the lock file. Fails with `ConcurrentOperation` when another
    /// instance already holds it.
    pub fn acquire(layout: &Layout) -> Result<Self> {
        if let Some(parent) = layout.lock_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&layout.lock_file)
        {
            Ok(mut file) => {
                // The pid is informational only; staleness is resolved by hand.
                let _ = write!(file, "{}", std::process::id());
                tracing::debug!(lock = %layout.lock_file.display(), "lock acquired");
                Ok(Self {
                    path: layout.lock_file.clone(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(HammerError::ConcurrentOperation.into())
            }
            Err(e) => Err(e).with_context(|| {
                format!("Failed to create lock file {}", layout.lock_file.display())
            }),
        }
    }
}

impl Drop for HammerLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(
                lock = %self.path.display(),
                "failed to remove lock file: {e}"
            );
        } else {
            tracing::debug!(lock = %self.path.display(), "lock released");
        }
    }
}
