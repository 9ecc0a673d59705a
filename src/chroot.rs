//! Chroot harness: scoped bind mounts for a staged deployment.
//!
//! Package-manager commands need `/proc`, `/sys` and `/dev` inside the
//! staged tree. The binds are scoped: the engine unmounts deliberately
//! before sealing, and the drop guard unwinds whatever is still bound when
//! an earlier error aborts the transaction.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::HammerError;
use crate::process::{self, CommandResult};

const BIND_DIRS: [&str; 3] = ["proc", "sys", "dev"];

/// Active bind mounts into a staged deployment.
#[derive(Debug)]
pub struct ChrootMounts {
    target: PathBuf,
    mounted: Vec<&'static str>,
}

impl ChrootMounts {
    /// Bind-mount the host's `/proc`, `/sys` and `/dev` into `target`,
    /// creating the mount points if absent.
    pub fn bind(target: &Path) -> Result<Self> {
        let mut mounts = Self {
            target: target.to_path_buf(),
            mounted: Vec::new(),
        };

        for dir in BIND_DIRS {
            let mountpoint = target.join(dir);
            fs::create_dir_all(&mountpoint).map_err(|e| {
                HammerError::Mount(format!("cannot create {}: {e}", mountpoint.display()))
            })?;

            let host_dir = format!("/{dir}");
            let result = process::run(
                "mount",
                [
                    std::ffi::OsStr::new("--bind"),
                    std::ffi::OsStr::new(&host_dir),
                    mountpoint.as_os_str(),
                ],
            )?;
            if !result.success() {
                // Drop unwinds the binds made so far.
                return Err(HammerError::Mount(format!(
                    "failed to bind /{dir}: {}",
                    result.stderr_trimmed()
                ))
                .into());
            }
            mounts.mounted.push(dir);
        }

        tracing::debug!(target = %target.display(), "bind mounts established");
        Ok(mounts)
    }

    /// Deliberate teardown. The engine must call this before sealing the
    /// deployment; a bound chroot cannot be made read-only.
    pub fn unmount(mut self) -> Result<()> {
        while !self.mounted.is_empty() {
            let dir = self.mounted.remove(0);
            let mountpoint = self.target.join(dir);
            let result = process::run("umount", [mountpoint.as_os_str()])?;
            if !result.success() {
                // Put it back so the drop guard logs the leftover.
                self.mounted.insert(0, dir);
                return Err(HammerError::Mount(format!(
                    "failed to unmount {}: {}",
                    mountpoint.display(),
                    result.stderr_trimmed()
                ))
                .into());
            }
        }
        tracing::debug!(target = %self.target.display(), "bind mounts released");
        Ok(())
    }
}

impl Drop for ChrootMounts {
    /// Cleanup path taken when an earlier failure aborts the transaction.
    /// Unmount failures here are logged and swallowed so they never mask
    /// the original error.
    fn drop(&mut self) {
        for dir in self.mounted.drain(..) {
            let mountpoint = self.target.join(dir);
            match process::run("umount", [mountpoint.as_os_str()]) {
                Ok(result) if result.success() => {}
                Ok(result) => tracing::warn!(
                    mountpoint = %mountpoint.display(),
                    "unmount during cleanup failed: {}",
                    result.stderr_trimmed()
                ),
                Err(e) => tracing::warn!(
                    mountpoint = %mountpoint.display(),
                    "unmount during cleanup failed: {e}"
                ),
            }
        }
    }
}

/// Run a shell command sequence inside the chroot, capturing output.
pub fn chroot_sh(target: &Path, script: &str) -> Result<CommandResult> {
    process::run(
        "chroot",
        [
            target.as_os_str(),
            std::ffi::OsStr::new("/bin/sh"),
            std::ffi::OsStr::new("-c"),
            std::ffi::OsStr::new(script),
        ],
    )
}

/// Run a single program inside the chroot with an argument vector.
pub fn chroot_exec(target: &Path, program: &str, args: &[&str]) -> Result<CommandResult> {
    let mut argv: Vec<&std::ffi::OsStr> = vec![target.as_os_str(), std::ffi::OsStr::new(program)];
    argv.extend(args.iter().map(std::ffi::OsStr::new));
    process::run("chroot", argv)
}
