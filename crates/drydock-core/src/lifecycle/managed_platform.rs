use std::collections::BTreeMap;

use tracing::info;

use super::executor::Executor;
use super::{status_key, Lifecycle, OperationReport, Toolbox};
use crate::cache::StatusCache;
use crate::error::{DrydockError, Result};
use crate::platform::{App, AppSpec, PlatformProvider};
use crate::probe::CheckOutcome;
use crate::service::{RuntimeFacts, ServiceConfig};

/// A service hosted on a managed platform. There is no host to ssh into:
/// setup and provision commands run locally with the platform's environment.
pub struct ManagedPlatform {
    config: ServiceConfig,
    tools: Toolbox,
    platform: Box<dyn PlatformProvider>,
}

impl ManagedPlatform {
    pub fn new(config: ServiceConfig, tools: Toolbox, platform: Box<dyn PlatformProvider>) -> Self {
        Self {
            config,
            tools,
            platform,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn require_app(&self) -> Result<App> {
        self.platform
            .find_app(self.config.name())?
            .ok_or_else(|| DrydockError::InstanceNotFound(self.config.name().to_string()))
    }

    fn executor(&self) -> Result<Executor<'_>> {
        let app = self.require_app()?;
        let runtime = RuntimeFacts {
            host: app_host(&app),
            username: None,
            pem: None,
        };
        let mut env: BTreeMap<String, String> = self.platform.command_env(&app.name);
        env.extend(self.config.string_map("config_vars"));
        Ok(Executor::local(&self.config, &self.tools, runtime, env))
    }
}

/// Host part of the app's web URL, or the platform's conventional
/// `<name>.herokuapp.com` when the URL is unknown.
fn app_host(app: &App) -> String {
    app.web_url
        .as_deref()
        .and_then(|url| reqwest::Url::parse(url).ok())
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| format!("{}.herokuapp.com", app.name))
}

impl Lifecycle for ManagedPlatform {
    fn create(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        let name = self.config.name();
        let mut report = OperationReport::new(name, "create");

        match self.platform.find_app(name)? {
            Some(app) => report.note(format!("app {} already exists", app.name)),
            None => {
                let spec = AppSpec {
                    name: name.to_string(),
                    region: self.config.non_empty("region").unwrap_or("us").to_string(),
                    stack: self.config.str_value("stack").unwrap_or_default().to_string(),
                    addons: self.config.string_list("addons"),
                };
                let app = self.platform.create_app(&spec)?;
                info!(service = name, app = %app.name, "app created");
                report.note(format!("created app {}", app.name));
                report.changed = true;
            }
        }

        let vars = self.config.string_map("config_vars");
        if !vars.is_empty() {
            self.platform.set_config_vars(name, &vars)?;
            report.note(format!("set {} config vars", vars.len()));
            report.changed = true;
        }
        if self.config.bool_value("maintenance") {
            self.platform.set_maintenance(name, true)?;
            report.note("maintenance mode on");
            report.changed = true;
        }

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
        self.executor()?.run_list("provision_list", &mut report)?;
        Ok(report)
    }

    fn check(&self, _cache: &mut StatusCache) -> Result<Vec<CheckOutcome>> {
        self.executor()?.run_checks()
    }

    fn terminate(&self, cache: &mut StatusCache) -> Result<OperationReport> {
        let mut report = OperationReport::new(self.config.name(), "terminate");
        let app = self.require_app()?;
        self.platform.destroy_app(&app.name)?;
        report.note(format!("destroyed app {}", app.name));
        report.changed = true;
        cache.invalidate(&status_key(&self.config));
        Ok(report)
    }

    fn status(&self, cache: &mut StatusCache) -> Result<String> {
        cache.get_or_insert_with(&status_key(&self.config), || {
            match self.platform.find_app(self.config.name())? {
                Some(app) => self.platform.app_status(&app.name),
                None => Ok("absent".to_string()),
            }
        })
    }
}
