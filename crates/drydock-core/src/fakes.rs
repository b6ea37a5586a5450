//! In-memory collaborator doubles for lifecycle tests. Every double writes
//! one line per call into a shared [`Journal`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;

use crate::cloud::{CloudProvider, Instance, InstanceSpec, SecurityGroup, SecurityGroupSpec};
use crate::config::Settings;
use crate::error::{DrydockError, Result};
use crate::lifecycle::Toolbox;
use crate::platform::{App, AppSpec, PlatformProvider};
use crate::probe::HealthProbe;
use crate::provisioner::{ApplyOptions, ConfigManager, PlaybookRunner};
use crate::remote::{RemoteConnector, RemoteSession, SshTarget};
use crate::shell::{CommandOutput, CommandRunner};
use crate::vm::{VmProvider, VmSpec};

/// `ssh_retries` of the test toolbox.
pub(crate) const SSH_RETRIES: u32 = 3;

#[derive(Default)]
struct State {
    entries: Vec<String>,
    failing: BTreeSet<String>,
    refusals: u32,
    statuses: BTreeMap<String, u16>,
    envs: Vec<BTreeMap<String, String>>,
}

#[derive(Clone, Default)]
pub(crate) struct Journal(Rc<RefCell<State>>);

impl Journal {
    pub(crate) fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().entries.push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.borrow().entries.clone()
    }

    /// Make `command` exit 1 wherever it runs.
    pub(crate) fn fail_on(&self, command: &str) {
        self.0.borrow_mut().failing.insert(command.to_string());
    }

    /// Refuse the next `count` ssh connections as unreachable.
    pub(crate) fn refuse_connections(&self, count: u32) {
        self.0.borrow_mut().refusals = count;
    }

    pub(crate) fn http_status(&self, url: &str, status: u16) {
        self.0.borrow_mut().statuses.insert(url.to_string(), status);
    }

    /// Environments passed to local commands, in call order.
    pub(crate) fn envs(&self) -> Vec<BTreeMap<String, String>> {
        self.0.borrow().envs.clone()
    }

    fn output(&self, command: &str) -> CommandOutput {
        if self.0.borrow().failing.contains(command) {
            CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("{command}: failed"),
            }
        } else {
            CommandOutput::default()
        }
    }

    fn take_refusal(&self) -> bool {
        let mut state = self.0.borrow_mut();
        if state.refusals > 0 {
            state.refusals -= 1;
            true
        } else {
            false
        }
    }
}

/// A toolbox of doubles with no retry delay.
pub(crate) fn toolbox(journal: &Journal) -> Toolbox {
    let settings = Settings {
        ssh_retries: SSH_RETRIES,
        ssh_retry_delay_secs: 0,
        ..Settings::default()
    };
    Toolbox {
        settings,
        runner: Box::new(FakeRunner(journal.clone())),
        remote: Box::new(FakeConnector(journal.clone())),
        config_manager: Box::new(FakeConfigManager(journal.clone())),
        playbooks: Box::new(FakePlaybooks(journal.clone())),
        probe: Box::new(FakeProbe(journal.clone())),
    }
}

// ---------------------------------------------------------------------------
// shell and ssh
// ---------------------------------------------------------------------------

pub(crate) struct FakeRunner(Journal);

impl CommandRunner for FakeRunner {
    fn run(&self, command: &str, env: &BTreeMap<String, String>) -> Result<CommandOutput> {
        self.0.record(format!("local.run {command}"));
        self.0 .0.borrow_mut().envs.push(env.clone());
        Ok(self.0.output(command))
    }
}

pub(crate) struct FakeConnector(Journal);

impl RemoteConnector for FakeConnector {
    fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>> {
        self.0.record(format!(
            "ssh.connect {}:{} {}",
            target.destination(),
            target.port,
            target.pem.display()
        ));
        if self.0.take_refusal() {
            return Err(DrydockError::Unreachable(target.host.clone()));
        }
        Ok(Box::new(FakeSession {
            journal: self.0.clone(),
            target: target.clone(),
        }))
    }
}

pub(crate) struct FakeSession {
    journal: Journal,
    target: SshTarget,
}

impl RemoteSession for FakeSession {
    fn target(&self) -> &SshTarget {
        &self.target
    }

    fn run(&mut self, command: &str) -> Result<CommandOutput> {
        self.journal.record(format!("ssh.run {command}"));
        Ok(self.journal.output(command))
    }

    fn sudo(&mut self, command: &str) -> Result<CommandOutput> {
        self.journal.record(format!("ssh.sudo {command}"));
        Ok(self.journal.output(command))
    }

    fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.journal
            .record(format!("ssh.put {} {remote}", local.display()));
        Ok(())
    }

    fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        self.journal
            .record(format!("ssh.get {remote} {}", local.display()));
        Ok(())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.journal.record(format!("ssh.close {}", self.target.host));
    }
}

// ---------------------------------------------------------------------------
// configuration management and probes
// ---------------------------------------------------------------------------

pub(crate) struct FakeConfigManager(Journal);

impl ConfigManager for FakeConfigManager {
    fn apply(
        &self,
        session: &mut dyn RemoteSession,
        manifest: &Path,
        facts: &BTreeMap<String, String>,
        _options: &ApplyOptions,
    ) -> Result<()> {
        let fact = |k: &str| facts.get(k).cloned().unwrap_or_default();
        self.0.record(format!(
            "puppet.apply {} host={} name={}",
            manifest.display(),
            fact("host"),
            fact("name")
        ));
        debug_assert_eq!(session.target().host, fact("host"));
        Ok(())
    }
}

pub(crate) struct FakePlaybooks(Journal);

impl PlaybookRunner for FakePlaybooks {
    fn run(&self, playbook: &Path, target: &SshTarget, _vars: &BTreeMap<String, String>) -> Result<()> {
        self.0
            .record(format!("ansible.run {} {}", playbook.display(), target.host));
        Ok(())
    }
}

pub(crate) struct FakeProbe(Journal);

impl HealthProbe for FakeProbe {
    fn http_status(&self, url: &str) -> Result<u16> {
        self.0.record(format!("probe.get {url}"));
        let status = self.0 .0.borrow().statuses.get(url).copied();
        status.ok_or_else(|| DrydockError::Unreachable(url.to_string()))
    }
}

// ---------------------------------------------------------------------------
// infrastructure providers
// ---------------------------------------------------------------------------

pub(crate) struct FakeCloud {
    journal: Journal,
    instances: RefCell<BTreeMap<String, Instance>>,
    groups: BTreeSet<String>,
    key_pairs: BTreeSet<String>,
}

impl FakeCloud {
    pub(crate) fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            instances: RefCell::new(BTreeMap::new()),
            groups: BTreeSet::new(),
            key_pairs: BTreeSet::new(),
        }
    }

    /// A running instance tagged `name`, reachable at `ip`.
    pub(crate) fn with_instance(self, name: &str, ip: &str) -> Self {
        self.instances
            .borrow_mut()
            .insert(name.to_string(), instance(name, Some(ip)));
        self
    }

    pub(crate) fn with_group(mut self, name: &str) -> Self {
        self.groups.insert(name.to_string());
        self
    }

    pub(crate) fn with_key_pair(mut self, name: &str) -> Self {
        self.key_pairs.insert(name.to_string());
        self
    }
}

fn instance(name: &str, ip: Option<&str>) -> Instance {
    Instance {
        id: format!("i-{name}"),
        name: name.to_string(),
        state: "running".to_string(),
        public_ip: ip.map(str::to_string),
        public_dns: None,
        private_ip: None,
        tags: BTreeMap::from([("Name".to_string(), name.to_string())]),
    }
}

impl CloudProvider for FakeCloud {
    fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>> {
        self.journal.record(format!("cloud.find_instance {name}"));
        Ok(self.instances.borrow().get(name).cloned())
    }

    fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        self.journal.record(format!(
            "cloud.create_instance {} {} {} {}",
            spec.name,
            spec.ami,
            spec.instance_type,
            spec.security_group_ids.join(",")
        ));
        let created = instance(&spec.name, None);
        self.instances
            .borrow_mut()
            .insert(spec.name.clone(), created.clone());
        Ok(created)
    }

    fn terminate_instance(&self, id: &str) -> Result<()> {
        self.journal.record(format!("cloud.terminate_instance {id}"));
        self.instances.borrow_mut().retain(|_, i| i.id != id);
        Ok(())
    }

    fn tag_instance(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let keys: Vec<&str> = tags.keys().map(String::as_str).collect();
        self.journal
            .record(format!("cloud.tag_instance {id} {}", keys.join(",")));
        Ok(())
    }

    fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>> {
        self.journal.record(format!("cloud.find_security_group {name}"));
        Ok(self.groups.contains(name).then(|| SecurityGroup {
            id: format!("sg-{name}"),
            name: name.to_string(),
        }))
    }

    fn sync_security_group(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroup> {
        self.journal
            .record(format!("cloud.sync_security_group {}", spec.name));
        Ok(SecurityGroup {
            id: format!("sg-{}", spec.name),
            name: spec.name.clone(),
        })
    }

    fn find_key_pair(&self, name: &str) -> Result<bool> {
        self.journal.record(format!("cloud.find_key_pair {name}"));
        Ok(self.key_pairs.contains(name))
    }

    fn associate_address(&self, instance_id: &str, address: &str) -> Result<()> {
        self.journal
            .record(format!("cloud.associate_address {instance_id} {address}"));
        Ok(())
    }

    fn create_bucket(&self, name: &str) -> Result<()> {
        self.journal.record(format!("cloud.create_bucket {name}"));
        Ok(())
    }
}

pub(crate) struct FakePlatform {
    journal: Journal,
    apps: RefCell<BTreeMap<String, App>>,
}

impl FakePlatform {
    pub(crate) fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            apps: RefCell::new(BTreeMap::new()),
        }
    }

    pub(crate) fn with_app(self, name: &str, web_url: Option<&str>) -> Self {
        self.apps.borrow_mut().insert(
            name.to_string(),
            App {
                name: name.to_string(),
                region: "us".to_string(),
                stack: "heroku-22".to_string(),
                web_url: web_url.map(str::to_string),
            },
        );
        self
    }
}

impl PlatformProvider for FakePlatform {
    fn find_app(&self, name: &str) -> Result<Option<App>> {
        self.journal.record(format!("platform.find_app {name}"));
        Ok(self.apps.borrow().get(name).cloned())
    }

    fn create_app(&self, spec: &AppSpec) -> Result<App> {
        self.journal.record(format!(
            "platform.create_app {} {} {}",
            spec.name,
            spec.region,
            spec.addons.join(",")
        ));
        let app = App {
            name: spec.name.clone(),
            region: spec.region.clone(),
            stack: spec.stack.clone(),
            web_url: Some(format!("https://{}.example.app/", spec.name)),
        };
        self.apps.borrow_mut().insert(spec.name.clone(), app.clone());
        Ok(app)
    }

    fn set_config_vars(&self, app: &str, vars: &BTreeMap<String, String>) -> Result<()> {
        let pairs: Vec<String> = vars.iter().map(|(k, v)| format!("{k}={v}")).collect();
        self.journal
            .record(format!("platform.config {app} {}", pairs.join(",")));
        Ok(())
    }

    fn set_maintenance(&self, app: &str, on: bool) -> Result<()> {
        self.journal.record(format!("platform.maintenance {app} {on}"));
        Ok(())
    }

    fn destroy_app(&self, app: &str) -> Result<()> {
        self.journal.record(format!("platform.destroy_app {app}"));
        self.apps.borrow_mut().remove(app);
        Ok(())
    }

    fn app_status(&self, app: &str) -> Result<String> {
        self.journal.record(format!("platform.status {app}"));
        Ok("up".to_string())
    }

    fn command_env(&self, app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("PLATFORM_APP".to_string(), app.to_string())])
    }
}

pub(crate) struct FakeVm {
    journal: Journal,
    machines: RefCell<BTreeMap<String, String>>,
}

impl FakeVm {
    pub(crate) fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            machines: RefCell::new(BTreeMap::new()),
        }
    }

    pub(crate) fn with_machine(self, name: &str, state: &str) -> Self {
        self.machines
            .borrow_mut()
            .insert(name.to_string(), state.to_string());
        self
    }
}

impl VmProvider for FakeVm {
    fn up(&self, spec: &VmSpec) -> Result<()> {
        self.journal.record(format!(
            "vm.up {} {} {} {}",
            spec.name, spec.box_name, spec.ip, spec.memory
        ));
        self.machines
            .borrow_mut()
            .insert(spec.name.clone(), "running".to_string());
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        self.journal.record(format!("vm.destroy {name}"));
        match self.machines.borrow_mut().remove(name) {
            Some(_) => Ok(()),
            None => Err(DrydockError::InstanceNotFound(name.to_string())),
        }
    }

    fn status(&self, name: &str) -> Result<String> {
        self.journal.record(format!("vm.status {name}"));
        Ok(self
            .machines
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_else(|| "not_created".to_string()))
    }
}
