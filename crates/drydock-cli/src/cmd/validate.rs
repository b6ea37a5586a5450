use std::path::Path;

use anyhow::Context;
use drydock_core::checks::{self, CheckReport};
use drydock_core::cloud::AwsCli;
use drydock_core::config::{Settings, WarnLevel};
use drydock_core::loader::{self, LoadOptions};
use drydock_core::service::ServiceClass;

use crate::output::{print_findings, print_json, print_report};

pub fn run(service: &Path, settings: Option<&Path>, offline: bool, json: bool) -> anyhow::Result<()> {
    let config = loader::load(service, LoadOptions::collecting())
        .with_context(|| format!("failed to load {}", service.display()))?;

    let reports: Vec<CheckReport> = if offline || config.class() != ServiceClass::CloudInstance {
        checks::run_all(&config, None)
    } else {
        let settings = Settings::load(settings).context("failed to load settings")?;
        for w in settings.validate() {
            if w.level == WarnLevel::Error {
                anyhow::bail!("invalid settings: {}", w.message);
            }
            tracing::warn!("settings: {}", w.message);
        }
        let region = config.str_value("region").unwrap_or("us-east-1");
        let cloud = AwsCli::new(settings.aws_profile.clone(), region);
        checks::run_all(&config, Some(&cloud))
    };

    let schema_errors = config.schema_errors();
    let error_count =
        schema_errors.len() + reports.iter().map(|r| r.errors.len()).sum::<usize>();

    if json {
        print_json(&serde_json::json!({
            "service": config.name(),
            "schema": config.kind().as_str(),
            "class": config.class(),
            "chain": config.chain(),
            "schema_errors": schema_errors,
            "checks": reports,
        }))?;
    } else {
        println!(
            "{} ({}, {})",
            config.name(),
            config.kind().as_str(),
            config.class()
        );
        if !schema_errors.is_empty() {
            println!("\nschema:");
            print_findings("error", schema_errors);
        }
        for report in &reports {
            print_report(report);
        }
    }

    if error_count > 0 {
        anyhow::bail!("validation found {error_count} error(s)");
    }
    if !json {
        println!("\nService is valid.");
    }
    Ok(())
}
