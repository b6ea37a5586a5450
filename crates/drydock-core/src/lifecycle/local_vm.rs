use tracing::info;

use super::executor::{remote_identity, Executor};
use super::{status_key, Lifecycle, OperationReport, Toolbox};
use crate::cache::StatusCache;
use crate::error::{DrydockError, Result};
use crate::probe::CheckOutcome;
use crate::service::ServiceConfig;
use crate::vm::{VmProvider, VmSpec};

/// A service running in a local virtual machine on a private network.
pub struct LocalVm {
    config: ServiceConfig,
    tools: Toolbox,
    vm: Box<dyn VmProvider>,
}

impl LocalVm {
    pub fn new(config: ServiceConfig, tools: Toolbox, vm: Box<dyn VmProvider>) -> Self {
        Self { config, tools, vm }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn spec(&self) -> Result<VmSpec> {
        let block = self
            .config
            .get("vm")
            .and_then(|v| v.as_object())
            .ok_or_else(|| DrydockError::Invalid("local VM service has no `vm` block".into()))?;
        VmSpec::from_block(self.config.name(), block)
    }

    fn executor(&self) -> Result<Executor<'_>> {
        let spec = self.spec()?;
        if self.vm.status(&spec.name)? == "not_created" {
            return Err(DrydockError::InstanceNotFound(spec.name));
        }
        let (target, runtime) = remote_identity(&self.config, &spec.ip);
        Ok(Executor::remote(&self.config, &self.tools, target, runtime))
    }
}

impl Lifecycle for LocalVm {
    fn create(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        let spec = self.spec()?;
        let mut report = OperationReport::new(self.config.name(), "create");
        if self.vm.status(&spec.name)? == "running" {
            report.note(format!("vm {} is already running", spec.name));
            return Ok(report);
        }
        self.vm.up(&spec)?;
        info!(service = %spec.name, ip = %spec.ip, "vm up");
        report.note(format!("vm {} up at {}", spec.name, spec.ip));
        report.changed = true;
        cache.invalidate(&status_key(&self.config));
        Ok(report)
    }

    fn setup(&self, _cache: &mut StatusCache) -> Result<OperationReport> {
        let mut report = OperationReport::new(self.config.name(), "setup");
        self.executor()?.run_list("setup_list", &mut report)?;
        Ok(report)
    }

    fn provision(&self, _cache: &mut StatusCache) -> Result<OperationReport> {
        let mut report = OperationReport::new(self.config.name(), "provision");
        let mut exec = self.executor()?;
        exec.run_list("provision_list", &mut report)?;
        exec.apply_configuration(&mut report)?;
        Ok(report)
    }

    fn check(&self, _cache: &mut StatusCache) -> Result<Vec<CheckOutcome>> {
        self.executor()?.run_checks()
    }

    fn terminate(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        let mut report = OperationReport::new(self.config.name(), "terminate");
        self.vm.destroy(self.config.name())?;
        report.note(format!("destroyed vm {}", self.config.name()));
        report.changed = true;
        cache.invalidate(&status_key(&self.config));
        Ok(report)
    }

    fn status(&self, cache: &mut StatusCache) -> Result<String> {
        cache.get_or_insert_with(&status_key(&self.config), || {
            self.vm.status(self.config.name())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{self, FakeVm, Journal};
    use crate::service::config_from;
    use serde_json::json;
    use std::time::Duration;

    fn box_doc() -> serde_json::Value {
        json!({
            "name": "devbox",
            "instance_type": "vagrant",
            "vm": {"box": "ubuntu/jammy64", "ip": "192.168.56.10", "memory": 2048},
            "username": "vagrant",
            "port": "22",
            "pem": "/home/dev/.vagrant.d/insecure_private_key",
            "setup_list": ["sudo apt-get install -y nginx"],
            "provision_list": ["local://ping -c1 {{host}}"],
            "check_list": [{"type": "command", "command": "systemctl is-active nginx"}]
        })
    }

    fn service(journal: &Journal, vm: FakeVm) -> LocalVm {
        LocalVm::new(config_from(box_doc()), fakes::toolbox(journal), Box::new(vm))
    }

    #[test]
    fn create_brings_the_vm_up() {
        let journal = Journal::default();
        let svc = service(&journal, FakeVm::new(&journal));
        let report = svc.create(&mut StatusCache::new(Duration::ZERO)).unwrap();
        assert!(report.changed);
        assert!(journal
            .entries()
            .contains(&"vm.up devbox ubuntu/jammy64 192.168.56.10 2048".to_string()));
    }

    #[test]
    fn create_skips_a_running_vm() {
        let journal = Journal::default();
        let svc = service(&journal, FakeVm::new(&journal).with_machine("devbox", "running"));
        let report = svc.create(&mut StatusCache::new(Duration::ZERO)).unwrap();
        assert!(!report.changed);
    }

    #[test]
    fn provision_connects_to_the_private_ip() {
        let journal = Journal::default();
        let svc = service(&journal, FakeVm::new(&journal).with_machine("devbox", "running"));
        svc.provision(&mut StatusCache::new(Duration::ZERO)).unwrap();
        let calls = journal.entries();
        assert!(calls.contains(&"local.run ping -c1 192.168.56.10".to_string()));
        // only local commands ran, so no session was opened
        assert!(!calls.iter().any(|c| c.starts_with("ssh.connect")));
    }

    #[test]
    fn setup_and_command_checks_run_over_ssh() {
        let journal = Journal::default();
        let svc = service(&journal, FakeVm::new(&journal).with_machine("devbox", "running"));
        let mut cache = StatusCache::new(Duration::ZERO);
        svc.setup(&mut cache).unwrap();
        let outcomes = svc.check(&mut cache).unwrap();
        assert!(outcomes[0].passed);
        let calls = journal.entries();
        assert!(calls.contains(
            &"ssh.connect vagrant@192.168.56.10:22 /home/dev/.vagrant.d/insecure_private_key"
                .to_string()
        ));
        assert!(calls.contains(&"ssh.run systemctl is-active nginx".to_string()));
    }

    #[test]
    fn setup_needs_a_created_vm() {
        let journal = Journal::default();
        let svc = service(&journal, FakeVm::new(&journal));
        let err = svc.setup(&mut StatusCache::new(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, DrydockError::InstanceNotFound(_)));
    }

    #[test]
    fn status_is_cached_and_cleared_by_terminate() {
        let journal = Journal::default();
        let svc = service(&journal, FakeVm::new(&journal).with_machine("devbox", "poweroff"));
        let mut cache = StatusCache::new(Duration::from_secs(60));
        assert_eq!(svc.status(&mut cache).unwrap(), "poweroff");
        assert_eq!(svc.status(&mut cache).unwrap(), "poweroff");
        svc.terminate(&mut cache).unwrap();
        assert_eq!(svc.status(&mut cache).unwrap(), "not_created");
        let polls = journal
            .entries()
            .iter()
            .filter(|c| c.as_str() == "vm.status devbox")
            .count();
        assert_eq!(polls, 2);
    }
}
