//! Switch and rollback between existing deployments.

use anyhow::Result;

use crate::paths::Layout;
use crate::transaction;

pub fn cmd_switch(layout: &Layout, deployment: Option<&str>) -> Result<()> {
    println!("Switching deployment...");
    let target = transaction::switch_to(layout, deployment)?;
    println!("Switched to deployment: {target}. Reboot to apply.");
    Ok(())
}

pub fn cmd_rollback(layout: &Layout, n: usize) -> Result<()> {
    println!("Rolling back {n} deployment(s)...");
    let target = transaction::rollback(layout, n)?;
    println!("Switched to deployment: {target}. Reboot to apply.");
    Ok(())
}
