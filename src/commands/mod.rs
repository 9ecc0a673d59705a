//! CLI command handlers.
//!
//! Each submodule handles one family of subcommands:
//! - `package` - atomic install/remove (or container delegation)
//! - `deploy` - deploy and update
//! - `switch` - switch and rollback
//! - `clean` - retention sweep
//! - `query` - status, history, check-transaction
//! - `lockdown` - recursive read-only toggle on the current deployment

pub mod clean;
pub mod deploy;
pub mod lockdown;
pub mod package;
pub mod query;
pub mod switch;

pub use clean::cmd_clean;
pub use deploy::{cmd_deploy, cmd_update};
pub use lockdown::{cmd_lock, cmd_unlock};
pub use package::{cmd_install, cmd_remove};
pub use query::{cmd_check_transaction, cmd_history, cmd_status};
pub use switch::{cmd_rollback, cmd_switch};
