//! Subprocess plumbing shared by every tool-backed collaborator.
//!
//! External tools (`ssh`, `aws`, `heroku`, `vagrant`, `puppet`,
//! `ansible-playbook`) are located with `which` before they are spawned so a
//! missing binary surfaces as [`DrydockError::ToolMissing`] rather than an
//! opaque spawn failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{DrydockError, Result};

/// Prefix marking a provisioning command that runs on the operator's machine
/// instead of the remote host.
pub const LOCAL_PREFIX: &str = "local://";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into [`DrydockError::CommandFailed`].
    pub fn into_result(self, command: &str) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(DrydockError::CommandFailed {
                command: command.to_string(),
                status: self.status,
                stderr: self.stderr.trim().chars().take(500).collect(),
            })
        }
    }
}

/// Locate `name` on PATH.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| DrydockError::ToolMissing(name.to_string()))
}

/// Whether `name` is available on PATH.
pub fn has_tool(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Spawn `cmd`, wait for it and capture both streams. A non-zero exit is not
/// an error here; callers decide with [`CommandOutput::into_result`].
pub fn capture(cmd: &mut Command, shown: &str) -> Result<CommandOutput> {
    debug!(command = shown, "spawning");
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let output = cmd.output().map_err(|e| {
        DrydockError::Collaborator(format!("failed to spawn `{shown}`: {e}"))
    })?;

    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Single-quote `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Split `command` into its `local://` body, if it carries the prefix.
pub fn strip_local(command: &str) -> Option<&str> {
    command.strip_prefix(LOCAL_PREFIX).map(str::trim_start)
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

/// Runs shell command lines on the operator's machine.
pub trait CommandRunner {
    fn run(&self, command: &str, env: &BTreeMap<String, String>) -> Result<CommandOutput>;
}

/// `sh -c` in a fixed working directory.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    workdir: PathBuf,
}

impl ShellRunner {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, env: &BTreeMap<String, String>) -> Result<CommandOutput> {
        info!(command, "running locally");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.workdir).envs(env);
        capture(&mut cmd, command)
    }
}
