//! Pre-commit sanity checks for a staged deployment.
//!
//! A deployment that passes these checks is expected to boot: the kernel
//! image and its initramfs are present, and every fstab entry mounts. A
//! failure aborts the enclosing transaction before anything irreversible
//! happens.

use std::path::Path;

use anyhow::Result;

use crate::chroot;
use crate::error::HammerError;

/// Verify the staged deployment is bootable with the given kernel.
pub fn check_deployment(target: &Path, kernel: &str) -> Result<()> {
    let vmlinuz = target.join(format!("boot/vmlinuz-{kernel}"));
    if !vmlinuz.exists() {
        return Err(HammerError::Sanity(format!(
            "missing kernel image /boot/vmlinuz-{kernel}"
        ))
        .into());
    }

    let initrd = target.join(format!("boot/initrd.img-{kernel}"));
    if !initrd.exists() {
        return Err(HammerError::Sanity(format!(
            "missing initramfs /boot/initrd.img-{kernel}"
        ))
        .into());
    }

    // Fake-mount everything in fstab; catches malformed entries before the
    // deployment is published.
    let result = chroot::chroot_exec(target, "mount", &["-f", "-a"])?;
    if !result.success() {
        return Err(HammerError::Sanity(format!(
            "fstab check failed: {}",
            result.stderr_trimmed()
        ))
        .into());
    }

    tracing::info!(deployment = %target.display(), kernel, "sanity check passed");
    Ok(())
}
