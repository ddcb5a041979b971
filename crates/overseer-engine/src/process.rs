//! External command helpers.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::{OverseerError, Result};

fn command_line<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|a| a.as_ref().to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command and capture its standard output.
pub async fn run_captured<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<String> {
    debug!(command = %command_line(program, args), "Running command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| OverseerError::Command {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(OverseerError::Command {
            command: command_line(program, args),
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command with the terminal attached and wait for it to finish.
pub async fn run_attached<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Result<()> {
    let line = command_line(program, args);
    debug!(command = %line, "Running command");
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| OverseerError::Command {
            command: program.to_string(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(OverseerError::Command {
            command: line,
            reason: status.to_string(),
        });
    }
    Ok(())
}
