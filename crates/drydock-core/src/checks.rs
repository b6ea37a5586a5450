//! Semantic checks over a loaded [`ServiceConfig`].
//!
//! Unlike schema validation these never fail the load. Each check returns a
//! [`CheckReport`] and callers decide what to do with the aggregate.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::cloud::CloudProvider;
use crate::probe::HealthCheck;
use crate::service::{RuntimeFacts, ServiceClass, ServiceConfig};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub check: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub messages: Vec<String>,
}

impl CheckReport {
    pub fn new(check: &str) -> Self {
        Self {
            check: check.to_string(),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

/// Run every check that applies to the service's class. Checks that need the
/// cloud account are skipped when `cloud` is `None`.
pub fn run_all(config: &ServiceConfig, cloud: Option<&dyn CloudProvider>) -> Vec<CheckReport> {
    let mut reports = vec![health_checks(config)];
    match (config.class(), cloud) {
        (ServiceClass::CloudInstance, Some(cloud)) => {
            reports.push(security_groups(config, cloud));
            reports.push(keypair(config, Some(cloud)));
        }
        (ServiceClass::CloudInstance, None) | (ServiceClass::LocalVm, _) => {
            reports.push(keypair(config, None));
        }
        (ServiceClass::ManagedPlatform, _) => {}
    }
    reports.push(template_coverage(config));
    reports
}

/// `check_list` entries name a known check type and their templates render
/// once a host is known.
pub fn health_checks(config: &ServiceConfig) -> CheckReport {
    let mut report = CheckReport::new("health_checks");
    let placeholder = RuntimeFacts {
        host: "host.invalid".to_string(),
        username: Some("user".to_string()),
        pem: Some("/dev/null".to_string()),
    };

    let entries = config.dict_list("check_list");
    if entries.is_empty() {
        report.warn("no health checks defined");
        return report;
    }
    for (index, entry) in entries.into_iter().enumerate() {
        let check = match HealthCheck::from_entry(entry) {
            Ok(check) => check,
            Err(e) => {
                report.error(format!("check_list[{index}]: {e}"));
                continue;
            }
        };
        match config.render_runtime(check.template(), &placeholder) {
            Ok(_) => report.note(format!("check_list[{index}]: {} {}", check.kind(), check.template())),
            Err(e) => report.error(format!("check_list[{index}]: {e}")),
        }
    }
    report
}

/// Every declared security group either exists in the account or carries
/// rules to create it from.
pub fn security_groups(config: &ServiceConfig, cloud: &dyn CloudProvider) -> CheckReport {
    let mut report = CheckReport::new("security_groups");
    for entry in config.dict_list("security_groups") {
        let Some(name) = entry.get("name").and_then(|v| v.as_str()) else {
            report.error("security group entry has no `name`");
            continue;
        };
        let has_rules = entry
            .get("rules")
            .and_then(|v| v.as_array())
            .is_some_and(|rules| !rules.is_empty());
        match cloud.find_security_group(name) {
            Ok(Some(group)) => report.note(format!("security group {name} is {}", group.id)),
            Ok(None) if has_rules => {
                report.warn(format!("security group {name} does not exist yet; create will add it"))
            }
            Ok(None) => report.error(format!("security group {name} does not exist and has no rules")),
            Err(e) => report.error(format!("security group {name}: {e}")),
        }
    }
    report
}

/// The private key exists locally and, when `cloud` is given, the key pair
/// is registered with the account.
pub fn keypair(config: &ServiceConfig, cloud: Option<&dyn CloudProvider>) -> CheckReport {
    let mut report = CheckReport::new("keypair");
    match config.non_empty("pem") {
        Some(raw) => {
            let pem = config.resolve_path(raw);
            if pem.is_file() {
                report.note(format!("private key {}", pem.display()));
            } else {
                report.error(format!("private key {} does not exist", pem.display()));
            }
        }
        None => report.error("no `pem` configured"),
    }

    if let (Some(cloud), Some(name)) = (cloud, config.non_empty("key_name")) {
        match cloud.find_key_pair(name) {
            Ok(true) => report.note(format!("key pair {name} is registered")),
            Ok(false) => report.error(format!("key pair {name} is not registered")),
            Err(e) => report.error(format!("key pair {name}: {e}")),
        }
    }
    report
}

static ERB_TAG: OnceLock<Regex> = OnceLock::new();
static ERB_VAR: OnceLock<Regex> = OnceLock::new();
static MANIFEST_VAR: OnceLock<Regex> = OnceLock::new();

fn erb_tag() -> &'static Regex {
    ERB_TAG.get_or_init(|| Regex::new(r"(?s)<%.*?%>").unwrap())
}

fn erb_var() -> &'static Regex {
    ERB_VAR.get_or_init(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

fn manifest_var() -> &'static Regex {
    MANIFEST_VAR.get_or_init(|| Regex::new(r"\$\{?::([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

/// Instance variables used inside ERB tags.
pub fn erb_references(text: &str) -> BTreeSet<String> {
    erb_tag()
        .find_iter(text)
        .flat_map(|tag| erb_var().captures_iter(tag.as_str()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Top-scope variables (`$::name` or `${::name}`) used by a manifest.
pub fn manifest_references(text: &str) -> BTreeSet<String> {
    manifest_var()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Configuration-management templates only reference names the facts define.
pub fn template_coverage(config: &ServiceConfig) -> CheckReport {
    let mut report = CheckReport::new("template_coverage");
    let known: BTreeSet<String> = config.fact_names().into_iter().collect();

    let mut scan = |path: &Path, references: fn(&str) -> BTreeSet<String>| {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                report.error(format!("{}: {e}", path.display()));
                return;
            }
        };
        let missing: Vec<String> = references(&text)
            .into_iter()
            .filter(|name| !known.contains(name))
            .collect();
        if missing.is_empty() {
            report.note(format!("{} is covered", path.display()));
        } else {
            report.error(format!(
                "{} references undefined facts: {}",
                path.display(),
                missing.join(", ")
            ));
        }
    };

    if let Some(manifest) = config.non_empty("manifest") {
        scan(&config.resolve_path(manifest), manifest_references);
    }
    for template in config.string_list("templates") {
        scan(&config.resolve_path(&template), erb_references);
    }
    report
}
