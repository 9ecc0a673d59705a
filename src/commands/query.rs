//! Read-only queries and the first-boot reconciliation.

use anyhow::Result;

use crate::lock::HammerLock;
use crate::metadata::{self, DeploymentMeta};
use crate::paths::Layout;
use crate::snapshot;
use crate::transaction::{self, Reconciliation};

/// Print the metadata of the current deployment.
pub fn cmd_status(layout: &Layout) -> Result<()> {
    let current = layout.current_basename()?;
    let meta = metadata::read_meta(&layout.deployment_path(&current))?;

    println!("Current deployment: {current}");
    print_meta(&meta);
    Ok(())
}

fn print_meta(meta: &DeploymentMeta) {
    println!("  created:        {}", meta.created);
    println!("  action:         {}", meta.action);
    println!("  parent:         {}", meta.parent);
    println!("  kernel:         {}", meta.kernel);
    println!("  system version: {}", meta.system_version);
    println!("  status:         {}", meta.status);
    if let Some(reason) = &meta.rollback_reason {
        println!("  rollback:       {reason}");
    }
    for (key, value) in &meta.extra {
        println!("  {key}: {value}");
    }
}

/// Print all deployments, newest first, marking the current one.
pub fn cmd_history(layout: &Layout) -> Result<()> {
    let current = layout.current_basename().ok();
    let names = snapshot::list_deployments(layout)?;

    let mut records: Vec<(String, Option<DeploymentMeta>)> = names
        .into_iter()
        .map(|name| {
            let meta = metadata::read_meta(&layout.deployment_path(&name)).ok();
            (name, meta)
        })
        .collect();
    records.sort_by(|a, b| {
        let created = |r: &(String, Option<DeploymentMeta>)| {
            r.1.as_ref().map(|m| m.created.clone()).unwrap_or_default()
        };
        created(b).cmp(&created(a)).then_with(|| b.0.cmp(&a.0))
    });

    for (name, meta) in records {
        let marker = if current.as_deref() == Some(name.as_str()) {
            '*'
        } else {
            ' '
        };
        match meta {
            Some(meta) => println!(
                "{marker} {name}  {}  {}  {}",
                meta.created, meta.status, meta.action
            ),
            None => println!("{marker} {name}  (metadata unreadable)"),
        }
    }
    Ok(())
}

/// Reconcile the pending-transaction marker against the booted deployment.
/// Intended to run from a boot-time service.
pub fn cmd_check_transaction(layout: &Layout) -> Result<()> {
    let _lock = HammerLock::acquire(layout)?;

    match transaction::reconcile_pending(layout)? {
        None => println!("No pending transaction."),
        Some(Reconciliation::Confirmed(name)) => {
            println!("Deployment {name} booted successfully; marked booted.");
        }
        Some(Reconciliation::Fallback(name)) => {
            println!("Deployment {name} did not boot; marked broken.");
        }
    }
    Ok(())
}
