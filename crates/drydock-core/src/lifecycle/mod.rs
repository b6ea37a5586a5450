//! Behavioral services.
//!
//! A loaded [`ServiceConfig`] is wrapped in one of three fixed variants,
//! picked from its [`ServiceClass`]. Each variant carries the configuration
//! as data plus the collaborators it drives, injected at construction:
//! shared ones in a [`Toolbox`] and its own infrastructure provider.

pub mod cloud_instance;
mod executor;
pub mod local_vm;
pub mod managed_platform;

use std::path::Path;

use serde::Serialize;

use crate::cache::StatusCache;
use crate::cloud::{AwsCli, CloudProvider};
use crate::config::Settings;
use crate::error::{DrydockError, Result};
use crate::platform::{HerokuCli, PlatformProvider};
use crate::probe::{CheckOutcome, HealthProbe, HttpProbe};
use crate::provisioner::{AnsiblePlaybook, ConfigManager, PlaybookRunner, PuppetApply};
use crate::remote::{RemoteConnector, SshConnector};
use crate::service::{ServiceClass, ServiceConfig};
use crate::shell::{CommandRunner, ShellRunner};
use crate::vm::{VagrantCli, VmProvider};

pub use cloud_instance::CloudInstance;
pub use local_vm::LocalVm;
pub use managed_platform::ManagedPlatform;

/// Collaborators every service variant uses.
pub struct Toolbox {
    pub settings: Settings,
    pub runner: Box<dyn CommandRunner>,
    pub remote: Box<dyn RemoteConnector>,
    pub config_manager: Box<dyn ConfigManager>,
    pub playbooks: Box<dyn PlaybookRunner>,
    pub probe: Box<dyn HealthProbe>,
}

impl Toolbox {
    /// Subprocess-backed collaborators. Local commands run in `workdir`.
    pub fn system(settings: Settings, workdir: &Path) -> Result<Self> {
        Ok(Self {
            runner: Box::new(ShellRunner::new(workdir)),
            remote: Box::new(SshConnector::new(settings.ssh_options.clone())),
            config_manager: Box::new(PuppetApply),
            playbooks: Box::new(AnsiblePlaybook::new(settings.ssh_options.clone())),
            probe: Box::new(HttpProbe::new(settings.check_timeout())?),
            settings,
        })
    }
}

/// What a lifecycle operation did.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub service: String,
    pub operation: &'static str,
    /// False when the operation found nothing to do.
    pub changed: bool,
    pub messages: Vec<String>,
}

impl OperationReport {
    pub fn new(service: &str, operation: &'static str) -> Self {
        Self {
            service: service.to_string(),
            operation,
            changed: false,
            messages: Vec::new(),
        }
    }

    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

pub trait Lifecycle {
    fn create(&self, cache: &mut StatusCache) -> Result<OperationReport>;
    fn setup(&self, cache: &mut StatusCache) -> Result<OperationReport>;
    fn provision(&self, cache: &mut StatusCache) -> Result<OperationReport>;
    fn check(&self, cache: &mut StatusCache) -> Result<Vec<CheckOutcome>>;
    fn terminate(&self, cache: &mut StatusCache) -> Result<OperationReport>;
    fn status(&self, cache: &mut StatusCache) -> Result<String>;
}

pub enum Service {
    CloudInstance(CloudInstance),
    ManagedPlatform(ManagedPlatform),
    LocalVm(LocalVm),
}

impl Service {
    /// Wire `config` to the subprocess-backed provider for its class.
    pub fn system(config: ServiceConfig, tools: Toolbox) -> Result<Self> {
        Ok(match config.class() {
            ServiceClass::CloudInstance => {
                let region = config.str_value("region").unwrap_or("us-east-1").to_string();
                let cloud = AwsCli::new(tools.settings.aws_profile.clone(), &region);
                Service::CloudInstance(CloudInstance::new(config, tools, Box::new(cloud)))
            }
            ServiceClass::ManagedPlatform => {
                let api_key = config.non_empty("api_key").ok_or_else(|| {
                    DrydockError::Invalid("managed platform service needs an `api_key`".into())
                })?;
                let platform = HerokuCli::new(api_key);
                Service::ManagedPlatform(ManagedPlatform::new(config, tools, Box::new(platform)))
            }
            ServiceClass::LocalVm => {
                let root = config.base_dir().join(crate::paths::DRYDOCK_DIR).join("vagrant");
                let vm = VagrantCli::new(&root);
                Service::LocalVm(LocalVm::new(config, tools, Box::new(vm)))
            }
        })
    }

    pub fn with_cloud(config: ServiceConfig, tools: Toolbox, cloud: Box<dyn CloudProvider>) -> Self {
        Service::CloudInstance(CloudInstance::new(config, tools, cloud))
    }

    pub fn with_platform(
        config: ServiceConfig,
        tools: Toolbox,
        platform: Box<dyn PlatformProvider>,
    ) -> Self {
        Service::ManagedPlatform(ManagedPlatform::new(config, tools, platform))
    }

    pub fn with_vm(config: ServiceConfig, tools: Toolbox, vm: Box<dyn VmProvider>) -> Self {
        Service::LocalVm(LocalVm::new(config, tools, vm))
    }

    pub fn config(&self) -> &ServiceConfig {
        self.inner().0
    }

    pub fn class(&self) -> ServiceClass {
        self.config().class()
    }

    fn inner(&self) -> (&ServiceConfig, &dyn Lifecycle) {
        match self {
            Service::CloudInstance(s) => (s.config(), s),
            Service::ManagedPlatform(s) => (s.config(), s),
            Service::LocalVm(s) => (s.config(), s),
        }
    }

    fn lifecycle(&self) -> &dyn Lifecycle {
        self.inner().1
    }
}

impl Lifecycle for Service {
    fn create(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        self.lifecycle().create(cache)
    }

    fn setup(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        self.lifecycle().setup(cache)
    }

    fn provision(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        self.lifecycle().provision(cache)
    }

    fn check(&self, cache: &mut StatusCache) -> Result<Vec<CheckOutcome>> {
        self.lifecycle().check(cache)
    }

    fn terminate(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        self.lifecycle().terminate(cache)
    }

    fn status(&self, cache: &mut StatusCache) -> Result<String> {
        self.lifecycle().status(cache)
    }
}

/// Cache key for a service's runtime status.
pub(crate) fn status_key(config: &ServiceConfig) -> String {
    format!("status:{}:{}", config.class(), config.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{self, FakeVm, Journal};
    use crate::service::config_from;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn service_delegates_to_its_variant() {
        let journal = Journal::default();
        let config = config_from(json!({
            "name": "devbox",
            "instance_type": "vagrant",
            "vm": {"box": "b", "ip": "10.1.1.1", "memory": "512"}
        }));
        let service = Service::with_vm(
            config,
            fakes::toolbox(&journal),
            Box::new(FakeVm::new(&journal).with_machine("devbox", "running")),
        );
        assert_eq!(service.class(), ServiceClass::LocalVm);
        assert_eq!(service.config().name(), "devbox");

        let mut cache = StatusCache::new(Duration::from_secs(60));
        assert_eq!(service.status(&mut cache).unwrap(), "running");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("status:local-vm:devbox").is_some());
    }
}
