//! External process execution
//!
//! Every host tool is looked up with `which` before it is spawned so a
//! missing binary is reported by name instead of as a bare spawn error.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

/// Locate a host tool in `PATH`
pub fn require_tool(tool: &str) -> Result<PathBuf> {
    which::which(tool).with_context(|| {
        format!("Required tool '{tool}' is not installed or not in PATH")
    })
}

/// Render a command line for logs and error messages
pub fn command_line(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command to completion, failing on a non-zero exit status
pub fn run(cmd: &mut Command) -> Result<Output> {
    run_with_input(cmd, None)
}

/// Run a command, optionally feeding `input` on stdin
pub fn run_with_input(cmd: &mut Command, input: Option<&str>) -> Result<Output> {
    let line = command_line(cmd);
    tracing::debug!("Running: {line}");

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if input.is_some() {
        cmd.stdin(Stdio::piped());
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to execute: {line}"))?;

    if let Some(input) = input {
        let mut stdin = child
            .stdin
            .take()
            .with_context(|| format!("No stdin for: {line}"))?;
        stdin
            .write_all(input.as_bytes())
            .with_context(|| format!("Failed to write stdin of: {line}"))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed to wait for: {line}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("Command '{line}' failed ({}): {}", output.status, stderr.trim());
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_rendering() {
        let mut cmd = Command::new("sfdisk");
        cmd.arg("--no-reread").arg("disk.img");
        assert_eq!(command_line(&cmd), "sfdisk --no-reread disk.img");
    }

    #[test]
    fn test_missing_tool_is_named() {
        let err = require_tool("definitely-not-a-real-tool-xyz").unwrap_err();
        assert!(err.to_string().contains("definitely-not-a-real-tool-xyz"));
    }

    #[test]
    fn test_run_reports_failure() {
        let err = run(Command::new("sh").args(["-c", "echo boom >&2; exit 3"])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
    }

    #[test]
    fn test_run_with_input_feeds_stdin() {
        let output = run_with_input(&mut Command::new("cat"), Some("label: gpt\n")).unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), "label: gpt\n");
    }
}
