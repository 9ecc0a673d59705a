//! Clean command - applies the retention policy.

use anyhow::Result;

use crate::paths::Layout;
use crate::retention;

pub fn cmd_clean(layout: &Layout) -> Result<()> {
    println!("Cleaning up old deployments...");
    let deleted = retention::clean(layout)?;
    if deleted == 0 {
        println!("Nothing to clean.");
    } else {
        println!("Removed {deleted} deployment(s).");
    }
    Ok(())
}
