use std::path::Path;

use anyhow::Context;
use drydock_core::cache::StatusCache;
use drydock_core::config::{Settings, WarnLevel};
use drydock_core::lifecycle::{Lifecycle, OperationReport, Service, Toolbox};
use drydock_core::loader::{self, LoadOptions};
use tracing::warn;

use crate::output::{print_json, print_table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Setup,
    Provision,
    Check,
    Terminate,
    Status,
}

pub fn run(
    service: &Path,
    settings: Option<&Path>,
    operation: Operation,
    json: bool,
) -> anyhow::Result<()> {
    let settings = Settings::load(settings).context("failed to load settings")?;
    for w in settings.validate() {
        match w.level {
            WarnLevel::Error => anyhow::bail!("invalid settings: {}", w.message),
            WarnLevel::Warning => warn!("settings: {}", w.message),
        }
    }

    let config = loader::load(service, LoadOptions::default())
        .with_context(|| format!("failed to load {}", service.display()))?;
    let mut cache = StatusCache::new(settings.status_ttl());
    let workdir = config.base_dir().to_path_buf();
    let tools = Toolbox::system(settings, &workdir)?;
    let service = Service::system(config, tools)?;
    let name = service.config().name().to_string();

    match operation {
        Operation::Create => report(service.create(&mut cache)?, json),
        Operation::Setup => report(service.setup(&mut cache)?, json),
        Operation::Provision => report(service.provision(&mut cache)?, json),
        Operation::Terminate => report(service.terminate(&mut cache)?, json),
        Operation::Status => {
            let status = service.status(&mut cache)?;
            if json {
                print_json(&serde_json::json!({
                    "service": name,
                    "class": service.class(),
                    "status": status,
                }))
            } else {
                println!("{name}: {status}");
                Ok(())
            }
        }
        Operation::Check => {
            let outcomes = service.check(&mut cache)?;
            if json {
                print_json(&outcomes)?;
            } else if outcomes.is_empty() {
                println!("{name}: no health checks defined");
            } else {
                let rows = outcomes
                    .iter()
                    .map(|o| {
                        vec![
                            o.kind.to_string(),
                            o.target.clone(),
                            if o.passed { "pass" } else { "FAIL" }.to_string(),
                            o.detail.clone(),
                        ]
                    })
                    .collect();
                print_table(&["CHECK", "TARGET", "RESULT", "DETAIL"], rows);
            }
            let failed = outcomes.iter().filter(|o| !o.passed).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} health checks failed", outcomes.len());
            }
            Ok(())
        }
    }
}

fn report(report: OperationReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&report);
    }
    let outcome = if report.changed { "done" } else { "nothing to do" };
    println!("{} {}: {outcome}", report.operation, report.service);
    for message in &report.messages {
        println!("  {message}");
    }
    Ok(())
}
