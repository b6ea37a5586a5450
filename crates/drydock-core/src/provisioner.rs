//! Configuration management: `puppet apply` on the remote host and
//! `ansible-playbook` from the operator's machine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::error::{DrydockError, Result};
use crate::remote::{RemoteSession, SshTarget};
use crate::shell;

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Module directories uploaded next to the manifest.
    pub modules: Vec<PathBuf>,
    /// `.erb` templates uploaded into `templates/`.
    pub templates: Vec<PathBuf>,
    /// Remote directory everything is staged in.
    pub staging_dir: String,
}

pub trait ConfigManager {
    fn apply(
        &self,
        session: &mut dyn RemoteSession,
        manifest: &Path,
        facts: &BTreeMap<String, String>,
        options: &ApplyOptions,
    ) -> Result<()>;
}

pub trait PlaybookRunner {
    fn run(
        &self,
        playbook: &Path,
        target: &SshTarget,
        vars: &BTreeMap<String, String>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// puppet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PuppetApply;

impl ConfigManager for PuppetApply {
    fn apply(
        &self,
        session: &mut dyn RemoteSession,
        manifest: &Path,
        facts: &BTreeMap<String, String>,
        options: &ApplyOptions,
    ) -> Result<()> {
        let staging = options.staging_dir.trim_end_matches('/');
        let modules_dir = format!("{staging}/modules");
        let templates_dir = format!("{staging}/templates");
        session
            .run(&format!(
                "mkdir -p {} {}",
                shell::quote(&modules_dir),
                shell::quote(&templates_dir)
            ))?
            .into_result("mkdir staging")?;

        let manifest_name = file_name(manifest)?;
        let remote_manifest = format!("{staging}/{manifest_name}");
        session.put(manifest, &remote_manifest)?;
        for module in &options.modules {
            session.put(module, &format!("{modules_dir}/{}", file_name(module)?))?;
        }
        for template in &options.templates {
            session.put(template, &format!("{templates_dir}/{}", file_name(template)?))?;
        }

        let line = puppet_command(&remote_manifest, &modules_dir, facts);
        info!(host = %session.target().host, manifest = %manifest.display(), "puppet apply");
        let out = session.sudo(&line)?;
        // --detailed-exitcodes: 2 means changes were applied.
        if out.status == 0 || out.status == 2 {
            Ok(())
        } else {
            out.into_result("puppet apply").map(|_| ())
        }
    }
}

/// `FACTER_x=... puppet apply` with every fact exported to facter. Names
/// that are not valid environment variable names are skipped.
pub fn puppet_command(manifest: &str, modules_dir: &str, facts: &BTreeMap<String, String>) -> String {
    let mut line = String::new();
    for (key, value) in facts.iter().filter(|(k, _)| is_env_name(k)) {
        line.push_str(&format!("FACTER_{}={} ", key, shell::quote(value)));
    }
    line.push_str(&format!(
        "puppet apply --detailed-exitcodes --modulepath={} {}",
        shell::quote(modules_dir),
        shell::quote(manifest)
    ));
    line
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DrydockError::Invalid(format!("{} has no file name", path.display())))
}

// ---------------------------------------------------------------------------
// ansible
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnsiblePlaybook {
    ssh_options: Vec<String>,
}

impl AnsiblePlaybook {
    pub fn new(ssh_options: Vec<String>) -> Self {
        Self { ssh_options }
    }

    /// Arguments for one run against `target`. `vars_file` holds the extra vars.
    pub fn arguments(&self, playbook: &Path, target: &SshTarget, vars_file: &Path) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            format!("{},", target.host),
            "-u".to_string(),
            target.user.clone(),
            "--private-key".to_string(),
            target.pem.display().to_string(),
            "-e".to_string(),
            format!("@{}", vars_file.display()),
        ];
        if target.port != 22 {
            args.push("-e".to_string());
            args.push(format!("ansible_port={}", target.port));
        }
        if !self.ssh_options.is_empty() {
            let joined: Vec<String> = self.ssh_options.iter().map(|o| format!("-o {o}")).collect();
            args.push(format!("--ssh-common-args={}", joined.join(" ")));
        }
        args.push(playbook.display().to_string());
        args
    }
}

impl PlaybookRunner for AnsiblePlaybook {
    fn run(
        &self,
        playbook: &Path,
        target: &SshTarget,
        vars: &BTreeMap<String, String>,
    ) -> Result<()> {
        shell::require_tool("ansible-playbook")?;
        let vars_file = crate::io::scratch_file("drydock-vars-", ".json", &serde_json::to_vec(vars)?)?;
        info!(host = %target.host, playbook = %playbook.display(), "ansible-playbook");

        let mut cmd = Command::new("ansible-playbook");
        cmd.args(self.arguments(playbook, target, vars_file.path()))
            .env("ANSIBLE_HOST_KEY_CHECKING", "False");
        if let Some(dir) = playbook.parent() {
            cmd.current_dir(dir);
        }
        shell::capture(&mut cmd, "ansible-playbook")?.into_result("ansible-playbook")?;
        Ok(())
    }
}
