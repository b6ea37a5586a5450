//! Managed-platform collaborator, backed by the `heroku` CLI.

use std::collections::BTreeMap;
use std::process::Command;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{DrydockError, Result};
use crate::shell::{self, CommandOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    pub name: String,
    pub region: String,
    pub stack: String,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppSpec {
    pub name: String,
    pub region: String,
    /// Empty means the platform default.
    pub stack: String,
    pub addons: Vec<String>,
}

pub trait PlatformProvider {
    fn find_app(&self, name: &str) -> Result<Option<App>>;
    fn create_app(&self, spec: &AppSpec) -> Result<App>;
    fn set_config_vars(&self, app: &str, vars: &BTreeMap<String, String>) -> Result<()>;
    fn set_maintenance(&self, app: &str, on: bool) -> Result<()>;
    fn destroy_app(&self, app: &str) -> Result<()>;
    /// One-word summary of the app's dynos, e.g. `up` or `crashed`.
    fn app_status(&self, app: &str) -> Result<String>;
    /// Environment handed to locally-run setup and provision commands.
    fn command_env(&self, app: &str) -> BTreeMap<String, String>;
}

#[derive(Debug, Clone)]
pub struct HerokuCli {
    api_key: String,
}

impl HerokuCli {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
        }
    }

    fn call(&self, args: &[&str]) -> Result<CommandOutput> {
        shell::require_tool("heroku")?;
        let mut cmd = Command::new("heroku");
        cmd.args(args).env("HEROKU_API_KEY", &self.api_key);
        let display = format!("heroku {}", args.first().copied().unwrap_or_default());
        shell::capture(&mut cmd, &display)
    }

    fn call_ok(&self, args: &[&str]) -> Result<CommandOutput> {
        let display = format!("heroku {}", args.first().copied().unwrap_or_default());
        self.call(args)?.into_result(&display)
    }
}

impl PlatformProvider for HerokuCli {
    fn find_app(&self, name: &str) -> Result<Option<App>> {
        let out = self.call(&["apps:info", "--app", name, "--json"])?;
        if !out.success() {
            if out.stderr.contains("Couldn't find that app") || out.stderr.contains("not found") {
                return Ok(None);
            }
            return out.into_result("heroku apps:info").map(|_| None);
        }
        let value: Value = serde_json::from_str(&out.stdout)?;
        Ok(Some(parse_app(&value["app"]).unwrap_or_else(|| App {
            name: name.to_string(),
            region: String::new(),
            stack: String::new(),
            web_url: None,
        })))
    }

    fn create_app(&self, spec: &AppSpec) -> Result<App> {
        info!(app = %spec.name, region = %spec.region, "creating app");
        let mut args = vec!["apps:create", spec.name.as_str(), "--region", spec.region.as_str(), "--json"];
        if !spec.stack.is_empty() {
            args.push("--stack");
            args.push(spec.stack.as_str());
        }
        let out = self.call_ok(&args)?;
        let value: Value = serde_json::from_str(&out.stdout)?;
        let app = parse_app(&value)
            .ok_or_else(|| DrydockError::Collaborator("apps:create returned no app".into()))?;

        for addon in &spec.addons {
            info!(app = %spec.name, addon = %addon, "adding addon");
            self.call_ok(&["addons:create", addon.as_str(), "--app", spec.name.as_str()])?;
        }
        Ok(app)
    }

    fn set_config_vars(&self, app: &str, vars: &BTreeMap<String, String>) -> Result<()> {
        if vars.is_empty() {
            return Ok(());
        }
        let pairs: Vec<String> = vars.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut args = vec!["config:set"];
        args.extend(pairs.iter().map(String::as_str));
        args.extend(["--app", app]);
        self.call_ok(&args)?;
        Ok(())
    }

    fn set_maintenance(&self, app: &str, on: bool) -> Result<()> {
        let verb = if on { "maintenance:on" } else { "maintenance:off" };
        self.call_ok(&[verb, "--app", app])?;
        Ok(())
    }

    fn destroy_app(&self, app: &str) -> Result<()> {
        info!(app, "destroying app");
        self.call_ok(&["apps:destroy", "--app", app, "--confirm", app])?;
        Ok(())
    }

    fn app_status(&self, app: &str) -> Result<String> {
        let out = self.call_ok(&["ps", "--app", app, "--json"])?;
        let value: Value = serde_json::from_str(&out.stdout)?;
        Ok(summarize_dynos(&value))
    }

    fn command_env(&self, app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("HEROKU_APP".to_string(), app.to_string()),
            ("HEROKU_API_KEY".to_string(), self.api_key.clone()),
        ])
    }
}

fn parse_app(value: &Value) -> Option<App> {
    Some(App {
        name: value["name"].as_str()?.to_string(),
        region: value["region"]["name"].as_str().unwrap_or_default().to_string(),
        stack: value["stack"]["name"]
            .as_str()
            .or_else(|| value["build_stack"]["name"].as_str())
            .unwrap_or_default()
            .to_string(),
        web_url: value["web_url"].as_str().map(str::to_string),
    })
}

/// Collapse dyno states into one word: every dyno's state when they agree,
/// `mixed` otherwise, `idle` without dynos.
pub fn summarize_dynos(value: &Value) -> String {
    let states: Vec<&str> = value
        .as_array()
        .map(|dynos| dynos.iter().filter_map(|d| d["state"].as_str()).collect())
        .unwrap_or_default();
    match states.first() {
        None => "idle".to_string(),
        Some(first) if states.iter().all(|s| s == first) => (*first).to_string(),
        Some(_) => "mixed".to_string(),
    }
}
