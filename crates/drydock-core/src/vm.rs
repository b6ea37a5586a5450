//! Local VM collaborator, backed by `vagrant`.
//!
//! Each service gets its own machine directory holding a generated
//! `Vagrantfile`, so several VMs can live side by side.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::document::scalar_text;
use crate::error::{DrydockError, Result};
use crate::shell::{self, CommandOutput};

/// The `vm` block of a local-VM service document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmSpec {
    pub name: String,
    pub box_name: String,
    pub ip: String,
    pub memory: String,
}

impl VmSpec {
    pub fn from_block(name: &str, block: &Map<String, Value>) -> Result<Self> {
        let field = |key: &str| -> Result<String> {
            block
                .get(key)
                .map(scalar_text)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DrydockError::Invalid(format!("vm block is missing `{key}`")))
        };
        Ok(Self {
            name: name.to_string(),
            box_name: field("box")?,
            ip: field("ip")?,
            memory: field("memory")?,
        })
    }

    pub fn vagrantfile(&self) -> String {
        format!(
            "# generated by drydock at {stamp}\n\
             Vagrant.configure(\"2\") do |config|\n\
             \x20 config.vm.box = \"{box_name}\"\n\
             \x20 config.vm.hostname = \"{name}\"\n\
             \x20 config.vm.network \"private_network\", ip: \"{ip}\"\n\
             \x20 config.vm.provider \"virtualbox\" do |vb|\n\
             \x20   vb.memory = \"{memory}\"\n\
             \x20 end\n\
             end\n",
            stamp = chrono::Utc::now().to_rfc3339(),
            box_name = self.box_name,
            name = self.name,
            ip = self.ip,
            memory = self.memory,
        )
    }
}

pub trait VmProvider {
    fn up(&self, spec: &VmSpec) -> Result<()>;
    fn destroy(&self, name: &str) -> Result<()>;
    /// Vagrant's machine state, e.g. `running`, `poweroff` or `not_created`.
    fn status(&self, name: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct VagrantCli {
    root: PathBuf,
}

impl VagrantCli {
    /// Machines live under `root/<name>/`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn machine_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn call(&self, name: &str, args: &[&str]) -> Result<CommandOutput> {
        shell::require_tool("vagrant")?;
        let mut cmd = Command::new("vagrant");
        cmd.args(args).current_dir(self.machine_dir(name));
        shell::capture(&mut cmd, &format!("vagrant {}", args.join(" ")))
    }
}

impl VmProvider for VagrantCli {
    fn up(&self, spec: &VmSpec) -> Result<()> {
        let dir = self.machine_dir(&spec.name);
        crate::io::atomic_write(&dir.join("Vagrantfile"), spec.vagrantfile().as_bytes())?;
        info!(vm = %spec.name, dir = %dir.display(), "vagrant up");
        self.call(&spec.name, &["up"])?.into_result("vagrant up")?;
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        if !self.machine_dir(name).join("Vagrantfile").exists() {
            return Err(DrydockError::InstanceNotFound(name.to_string()));
        }
        info!(vm = name, "vagrant destroy");
        self.call(name, &["destroy", "-f"])?
            .into_result("vagrant destroy")?;
        Ok(())
    }

    fn status(&self, name: &str) -> Result<String> {
        if !self.machine_dir(name).join("Vagrantfile").exists() {
            return Ok("not_created".to_string());
        }
        let out = self
            .call(name, &["status", "--machine-readable"])?
            .into_result("vagrant status")?;
        Ok(parse_machine_state(&out.stdout).unwrap_or_else(|| "unknown".to_string()))
    }
}

/// Pull the `state` field out of `vagrant status --machine-readable`.
/// Lines look like `1700000000,default,state,running`.
pub fn parse_machine_state(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.splitn(4, ',');
        let _ts = parts.next()?;
        let _target = parts.next()?;
        if parts.next()? == "state" {
            parts.next().map(str::to_string)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn spec_from_vm_block() {
        let block = json!({"box": "ubuntu/jammy64", "ip": "192.168.56.10", "memory": 2048});
        let spec = VmSpec::from_block("dev", block.as_object().unwrap()).unwrap();
        assert_eq!(spec.memory, "2048");
        let file = spec.vagrantfile();
        assert!(file.contains("config.vm.box = \"ubuntu/jammy64\""));
        assert!(file.contains("ip: \"192.168.56.10\""));
        assert!(file.contains("vb.memory = \"2048\""));
    }

    #[test]
    fn spec_requires_every_key() {
        let block = json!({"box": "ubuntu/jammy64", "ip": ""});
        let err = VmSpec::from_block("dev", block.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("`ip`"));
    }

    #[test]
    fn machine_state_parsing() {
        let out = "1700000000,default,metadata,provider,virtualbox\n\
                   1700000000,default,state,running\n\
                   1700000000,default,state-human-short,running\n";
        assert_eq!(parse_machine_state(out).as_deref(), Some("running"));
        assert_eq!(parse_machine_state("garbage"), None);
    }

    #[test]
    fn status_without_machine_dir_is_not_created() {
        let dir = tempfile::TempDir::new().unwrap();
        let vagrant = VagrantCli::new(dir.path());
        assert_eq!(vagrant.status("ghost").unwrap(), "not_created");
        assert!(matches!(
            vagrant.destroy("ghost").unwrap_err(),
            DrydockError::InstanceNotFound(_)
        ));
    }
}
