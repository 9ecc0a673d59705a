//! Recursive read-only toggle on the current deployment.

use anyhow::Result;

use crate::lock::HammerLock;
use crate::paths::Layout;
use crate::snapshot;

pub fn cmd_lock(layout: &Layout) -> Result<()> {
    let _lock = HammerLock::acquire(layout)?;
    let current = layout.current_target()?;
    snapshot::set_readonly_recursive(layout, &current, true)?;
    println!("Current deployment locked read-only.");
    Ok(())
}

pub fn cmd_unlock(layout: &Layout) -> Result<()> {
    let _lock = HammerLock::acquire(layout)?;
    let current = layout.current_target()?;
    snapshot::set_readonly_recursive(layout, &current, false)?;
    println!("Current deployment unlocked. Remember to lock it again.");
    Ok(())
}
