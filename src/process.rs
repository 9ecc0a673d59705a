//! External command execution.
//!
//! Mutating operations drive `btrfs`, `mount` and the package manager through
//! this module. Capture mode collects both streams for the caller to
//! interpret; inherit mode forwards them to the terminal for delegated tools.

use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// True if the command exited with status zero.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 when terminated by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Run a program with an argument vector, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; callers inspect the result and
/// decide how to report it. Only a failure to spawn the program at all is
/// surfaced as an error.
pub fn run<I, S>(program: &str, args: I) -> Result<CommandResult>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute '{}'. Is it installed?", program))?;

    Ok(CommandResult {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a program with stdio inherited from this process.
///
/// Used when delegating to tools whose output the user should see live,
/// such as the container helper.
pub fn run_inherit<I, S>(program: &str, args: I) -> Result<ExitStatus>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to execute '{}'. Is it installed?", program))
}
