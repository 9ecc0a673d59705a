//! Core log initialization.
//!
//! Operational detail goes to the append-only core log through `tracing`;
//! user-facing progress stays on stdout. When the log file cannot be opened
//! (unprivileged test runs), logging is silently disabled.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::paths::Layout;

pub fn init(layout: &Layout) {
    let Some(parent) = layout.log_file.parent() else {
        return;
    };
    if fs::create_dir_all(parent).is_err() {
        return;
    }
    let Ok(file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&layout.log_file)
    else {
        return;
    };

    let filter = EnvFilter::try_from_env("HAMMER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
