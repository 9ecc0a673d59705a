use anyhow::Result;
use clap::{Parser, Subcommand};

use hammer_core::commands;
use hammer_core::error::HammerError;
use hammer_core::logging;
use hammer_core::paths::Layout;

#[derive(Parser)]
#[command(
    name = "hammer-core",
    version,
    about = "Core operations for the Hammer tool in HackerOS Atomic"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package atomically in a new deployment
    Install {
        package: String,
        /// Delegate to the container tool instead of mutating the system
        #[arg(long)]
        container: bool,
    },
    /// Remove a package atomically in a new deployment
    Remove {
        package: String,
        /// Delegate to the container tool instead of mutating the system
        #[arg(long)]
        container: bool,
    },
    /// Rebuild the current system as a new deployment
    Deploy,
    /// Upgrade all packages atomically in a new deployment
    Update,
    /// Switch to a named deployment, or to the previous one
    Switch { deployment: Option<String> },
    /// Switch to the Nth newest deployment other than the current
    Rollback {
        #[arg(default_value_t = 1)]
        n: usize,
    },
    /// Delete old deployments beyond the retention limit
    Clean,
    /// Print metadata of the current deployment
    Status,
    /// List all deployments, newest first
    History,
    /// Reconcile the pending-transaction marker after a reboot
    CheckTransaction,
    /// Seal the current deployment and its nested subvolumes read-only
    Lock,
    /// Make the current deployment and its nested subvolumes writable
    Unlock,
}

fn main() {
    let cli = Cli::parse();
    let layout = Layout::system();
    logging::init(&layout);

    if let Err(err) = run(&layout, cli.command) {
        tracing::error!("{err:#}");
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(layout: &Layout, command: Commands) -> Result<()> {
    require_root()?;

    match command {
        Commands::Install { package, container } => {
            commands::cmd_install(layout, &package, container)
        }
        Commands::Remove { package, container } => {
            commands::cmd_remove(layout, &package, container)
        }
        Commands::Deploy => commands::cmd_deploy(layout),
        Commands::Update => commands::cmd_update(layout),
        Commands::Switch { deployment } => commands::cmd_switch(layout, deployment.as_deref()),
        Commands::Rollback { n } => commands::cmd_rollback(layout, n),
        Commands::Clean => commands::cmd_clean(layout),
        Commands::Status => commands::cmd_status(layout),
        Commands::History => commands::cmd_history(layout),
        Commands::CheckTransaction => commands::cmd_check_transaction(layout),
        Commands::Lock => commands::cmd_lock(layout),
        Commands::Unlock => commands::cmd_unlock(layout),
    }
}

fn require_root() -> Result<()> {
    if rustix::process::getuid().is_root() {
        Ok(())
    } else {
        Err(HammerError::NotRoot.into())
    }
}
