//! Atomic package install and remove.

use anyhow::{bail, Result};

use crate::paths::Layout;
use crate::process;
use crate::transaction::{self, Operation};

/// External helper handling container-scoped, non-atomic package work.
const CONTAINER_TOOL: &str = "hammer-container";

pub fn cmd_install(layout: &Layout, package: &str, container: bool) -> Result<()> {
    if container {
        return delegate_to_container("install", package);
    }

    println!("Installing {package} as a new deployment...");
    let staged = transaction::run_transaction(layout, &Operation::Install(package.to_string()))?;
    println!("Deployment created at: {}", staged.display());
    println!("Atomic install completed. Reboot to apply.");
    Ok(())
}

pub fn cmd_remove(layout: &Layout, package: &str, container: bool) -> Result<()> {
    if container {
        return delegate_to_container("remove", package);
    }

    println!("Removing {package} in a new deployment...");
    let staged = transaction::run_transaction(layout, &Operation::Remove(package.to_string()))?;
    println!("Deployment created at: {}", staged.display());
    println!("Atomic remove completed. Reboot to apply.");
    Ok(())
}

fn delegate_to_container(verb: &str, package: &str) -> Result<()> {
    transaction::validate_package_name(package)?;
    let status = process::run_inherit(CONTAINER_TOOL, [verb, package])?;
    if !status.success() {
        bail!(
            "{CONTAINER_TOOL} {verb} {package} failed (exit code {})",
            status.code().unwrap_or(-1)
        );
    }
    Ok(())
}
