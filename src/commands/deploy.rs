//! Deploy and update: whole-system deployments.

use anyhow::Result;

use crate::paths::Layout;
use crate::transaction::{self, Operation};

/// Rebuild the current system as a fresh deployment.
pub fn cmd_deploy(layout: &Layout) -> Result<()> {
    println!("Creating new deployment...");
    let staged = transaction::run_transaction(layout, &Operation::Deploy)?;
    println!("Deployment created at: {}", staged.display());
    println!("Reboot to apply.");
    Ok(())
}

/// Upgrade all packages in a fresh deployment.
pub fn cmd_update(layout: &Layout) -> Result<()> {
    println!("Updating system in a new deployment...");
    let staged = transaction::run_transaction(layout, &Operation::Update)?;
    println!("Deployment created at: {}", staged.display());
    println!("Atomic update completed. Reboot to apply.");
    Ok(())
}
