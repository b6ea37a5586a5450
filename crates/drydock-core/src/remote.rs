//! Remote execution over SSH.
//!
//! A [`RemoteConnector`] opens a [`RemoteSession`] for one host. The session
//! is the scoped connection context: it is acquired before any remote call
//! and released when dropped, on every exit path.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{DrydockError, Result};
use crate::shell::{self, CommandOutput};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub pem: PathBuf,
    pub port: u16,
}

impl SshTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

pub trait RemoteConnector {
    /// Open a session. Hosts that refuse or time out yield
    /// [`DrydockError::Unreachable`], which callers may retry.
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>>;
}

pub trait RemoteSession {
    fn target(&self) -> &SshTarget;
    fn run(&mut self, command: &str) -> Result<CommandOutput>;
    fn sudo(&mut self, command: &str) -> Result<CommandOutput>;
    /// Copy a local file or directory to `remote`.
    fn put(&mut self, local: &Path, remote: &str) -> Result<()>;
    fn get(&mut self, remote: &str, local: &Path) -> Result<()>;
}

/// Wrap `command` so it runs as root through a non-interactive sudo.
pub fn sudo_line(command: &str) -> String {
    format!("sudo -n sh -c {}", shell::quote(command))
}

// ---------------------------------------------------------------------------
// OpenSSH implementation
// ---------------------------------------------------------------------------

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshConnector {
    options: Vec<String>,
}

impl SshConnector {
    pub fn new(options: Vec<String>) -> Self {
        Self { options }
    }
}

impl RemoteConnector for SshConnector {
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>> {
        shell::require_tool("ssh")?;
        let control_dir = tempfile::Builder::new().prefix("drydock-ssh-").tempdir()?;
        let session = SshSession {
            target: target.clone(),
            options: self.options.clone(),
            control_path: control_dir.path().join("control"),
            _control_dir: control_dir,
        };

        let out = session.open_master()?;
        if out.status == SSH_CONNECTION_FAILURE {
            return Err(DrydockError::Unreachable(format!(
                "{}:{}: {}",
                target.host,
                target.port,
                out.stderr.trim()
            )));
        }
        out.into_result("ssh -fN")?;
        info!(host = %target.host, user = %target.user, "ssh session open");
        Ok(Box::new(session))
    }
}

struct SshSession {
    target: SshTarget,
    options: Vec<String>,
    control_path: PathBuf,
    _control_dir: TempDir,
}

impl SshSession {
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.target.pem.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args
    }

    /// Start the backgrounded master connection every later call reuses.
    /// Its stderr goes to a file: a piped stream would stay open for as long
    /// as the master lives.
    fn open_master(&self) -> Result<CommandOutput> {
        let mut errors = tempfile::tempfile()?;
        let status = Command::new("ssh")
            .args(self.common_args())
            .args(["-o", "ControlPersist=300", "-f", "-N", "-p"])
            .arg(self.target.port.to_string())
            .arg(self.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(errors.try_clone()?))
            .status()?;
        let mut stderr = String::new();
        errors.seek(SeekFrom::Start(0))?;
        errors.read_to_string(&mut stderr)?;
        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: String::new(),
            stderr,
        })
    }

    fn ssh(&self, remote: &str) -> Result<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(self.target.destination())
            .arg(remote);
        shell::capture(&mut cmd, &format!("ssh {}", self.target.destination()))
    }

    fn scp(&self, from: &str, to: &str, recursive: bool) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.args(self.common_args())
            .arg("-P")
            .arg(self.target.port.to_string());
        if recursive {
            cmd.arg("-r");
        }
        cmd.arg(from).arg(to);
        let display = format!("scp {from} {to}");
        shell::capture(&mut cmd, &display)?.into_result(&display)?;
        Ok(())
    }

    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.target.destination(), path)
    }
}

impl RemoteSession for SshSession {
    fn target(&self) -> &SshTarget {
        &self.target
    }

    fn run(&mut self, command: &str) -> Result<CommandOutput> {
        info!(host = %self.target.host, command, "running remotely");
        let out = self.ssh(command)?;
        if out.status == SSH_CONNECTION_FAILURE {
            return Err(DrydockError::Unreachable(format!(
                "{}: {}",
                self.target.host,
                out.stderr.trim()
            )));
        }
        Ok(out)
    }

    fn sudo(&mut self, command: &str) -> Result<CommandOutput> {
        self.run(&sudo_line(command))
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        debug!(local = %local.display(), remote, "uploading");
        self.scp(&local.display().to_string(), &self.remote_spec(remote), local.is_dir())
    }

    fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        debug!(remote, local = %local.display(), "downloading");
        self.scp(&self.remote_spec(remote), &local.display().to_string(), false)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(self.target.destination());
        if let Err(e) = shell::capture(&mut cmd, "ssh -O exit") {
            warn!(host = %self.target.host, "failed to close ssh master: {e}");
        }
    }
}
