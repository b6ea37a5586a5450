use std::collections::BTreeMap;

use tracing::info;

use super::executor::{remote_identity, Executor};
use super::{status_key, Lifecycle, OperationReport, Toolbox};
use crate::cache::StatusCache;
use crate::cloud::{CloudProvider, Instance, InstanceSpec, SecurityGroupSpec};
use crate::error::{DrydockError, Result};
use crate::probe::CheckOutcome;
use crate::service::ServiceConfig;

/// A service that runs on its own cloud instance, found by its `Name` tag.
pub struct CloudInstance {
    config: ServiceConfig,
    tools: Toolbox,
    cloud: Box<dyn CloudProvider>,
}

impl CloudInstance {
    pub fn new(config: ServiceConfig, tools: Toolbox, cloud: Box<dyn CloudProvider>) -> Self {
        Self {
            config,
            tools,
            cloud,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn require_instance(&self) -> Result<Instance> {
        self.cloud
            .find_instance_by_name(self.config.name())?
            .ok_or_else(|| DrydockError::InstanceNotFound(self.config.name().to_string()))
    }

    /// The elastic IP when one is configured, else the instance's own address.
    fn host_of(&self, instance: &Instance) -> Result<String> {
        if let Some(eip) = self.config.non_empty("elastic_ip") {
            return Ok(eip.to_string());
        }
        instance.address().map(str::to_string).ok_or_else(|| {
            DrydockError::Unreachable(format!("instance {} has no address yet", instance.id))
        })
    }

    fn executor(&self) -> Result<Executor<'_>> {
        let instance = self.require_instance()?;
        let host = self.host_of(&instance)?;
        let (target, runtime) = remote_identity(&self.config, &host);
        Ok(Executor::remote(&self.config, &self.tools, target, runtime))
    }

    fn instance_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.config.string_map("tags");
        tags.insert("drydock:service".to_string(), self.config.name().to_string());
        tags.insert(
            "drydock:created".to_string(),
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        tags
    }
}

impl Lifecycle for CloudInstance {
    fn create(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        let name = self.config.name();
        let mut report = OperationReport::new(name, "create");

        if let Some(existing) = self.cloud.find_instance_by_name(name)? {
            report.note(format!("instance {} already exists ({})", existing.id, existing.state));
            return Ok(report);
        }

        let mut group_ids = Vec::new();
        for entry in self.config.dict_list("security_groups") {
            let spec = SecurityGroupSpec::from_entry(entry)?;
            let group = self.cloud.sync_security_group(&spec)?;
            report.note(format!("security group {} ({})", group.name, group.id));
            group_ids.push(group.id);
        }

        let spec = InstanceSpec {
            name: name.to_string(),
            ami: self.config.str_value("ami").unwrap_or_default().to_string(),
            instance_type: self
                .config
                .str_value("instance_type")
                .unwrap_or_default()
                .to_string(),
            key_name: self.config.str_value("key_name").unwrap_or_default().to_string(),
            security_group_ids: group_ids,
            detailed_monitoring: self.config.bool_value("detailed_monitoring"),
        };
        let instance = self.cloud.create_instance(&spec)?;
        info!(service = name, id = %instance.id, "instance created");
        report.note(format!("created instance {}", instance.id));
        report.changed = true;

        self.cloud.tag_instance(&instance.id, &self.instance_tags())?;

        if let Some(eip) = self.config.non_empty("elastic_ip") {
            self.cloud.associate_address(&instance.id, eip)?;
            report.note(format!("associated {eip}"));
        }
        if let Some(bucket) = self.config.non_empty("bucket") {
            self.cloud.create_bucket(bucket)?;
            report.note(format!("bucket {bucket} ready"));
        }

        cache.invalidate(&status_key(&self.config));
        Ok(report)
    }

    fn setup(&self, _cache: &mut StatusCache) -> Result<OperationReport> {
        let mut report = OperationReport::new(self.config.name(), "setup");
        let mut exec = self.executor()?;
        exec.run_list("setup_list", &mut report)?;
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
        let instance = self.require_instance()?;
        self.cloud.terminate_instance(&instance.id)?;
        report.note(format!("terminated instance {}", instance.id));
        report.changed = true;
        cache.invalidate(&status_key(&self.config));
        Ok(report)
    }

    fn status(&self, cache: &mut StatusCache) -> Result<String> {
        cache.get_or_insert_with(&status_key(&self.config), || {
            Ok(self
                .cloud
                .find_instance_by_name(self.config.name())?
                .map(|i| i.state)
                .unwrap_or_else(|| "absent".to_string()))
        })
    }
}
