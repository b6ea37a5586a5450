//! Step execution shared by the service variants: command lists, remote
//! sessions, configuration management and health checks.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{OperationReport, Toolbox};
use crate::error::{DrydockError, Result};
use crate::probe::{CheckOutcome, HealthCheck};
use crate::provisioner::ApplyOptions;
use crate::remote::{RemoteSession, SshTarget};
use crate::service::{RuntimeFacts, ServiceConfig};
use crate::shell::{self, CommandOutput};

/// Connect to `target`, retrying transient failures up to
/// `settings.ssh_retries` attempts in total.
pub(crate) fn connect_with_retry(
    tools: &Toolbox,
    target: &SshTarget,
) -> Result<Box<dyn RemoteSession>> {
    let attempts = tools.settings.ssh_retries.max(1);
    let mut attempt = 1;
    loop {
        match tools.remote.connect(target) {
            Ok(session) => return Ok(session),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    host = %target.host,
                    attempt,
                    attempts,
                    "ssh not ready, retrying: {e}"
                );
                thread::sleep(tools.settings.retry_delay());
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// SSH target and runtime facts for a host reachable at `host`.
pub(crate) fn remote_identity(config: &ServiceConfig, host: &str) -> (SshTarget, RuntimeFacts) {
    let user = config.non_empty("username").unwrap_or("root").to_string();
    let pem = config
        .non_empty("pem")
        .map(|p| config.resolve_path(p))
        .unwrap_or_default();
    let target = SshTarget {
        host: host.to_string(),
        user: user.clone(),
        pem: pem.clone(),
        port: config.port(),
    };
    let runtime = RuntimeFacts {
        host: host.to_string(),
        username: Some(user),
        pem: Some(pem.display().to_string()),
    };
    (target, runtime)
}

/// Runs one operation's steps. Remote sessions are opened on first use and
/// closed when the executor is dropped.
pub(crate) struct Executor<'a> {
    config: &'a ServiceConfig,
    tools: &'a Toolbox,
    runtime: RuntimeFacts,
    target: Option<SshTarget>,
    env: BTreeMap<String, String>,
    session: Option<Box<dyn RemoteSession>>,
}

impl<'a> Executor<'a> {
    /// Commands without `local://` run on `target`.
    pub(crate) fn remote(
        config: &'a ServiceConfig,
        tools: &'a Toolbox,
        target: SshTarget,
        runtime: RuntimeFacts,
    ) -> Self {
        Self {
            config,
            tools,
            runtime,
            target: Some(target),
            env: BTreeMap::new(),
            session: None,
        }
    }

    /// Every command runs locally with `env` exported.
    pub(crate) fn local(
        config: &'a ServiceConfig,
        tools: &'a Toolbox,
        runtime: RuntimeFacts,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            config,
            tools,
            runtime,
            target: None,
            env,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut dyn RemoteSession> {
        if self.session.is_none() {
            let target = self.target.as_ref().ok_or_else(|| {
                DrydockError::Collaborator(format!(
                    "service '{}' has no remote host",
                    self.config.name()
                ))
            })?;
            self.session = Some(connect_with_retry(self.tools, target)?);
        }
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(DrydockError::Collaborator("ssh session was not opened".into())),
        }
    }

    fn execute(&mut self, line: &str) -> Result<CommandOutput> {
        match shell::strip_local(line) {
            Some(body) => self.tools.runner.run(body, &self.env),
            None if self.target.is_none() => self.tools.runner.run(line, &self.env),
            None => self.session()?.run(line),
        }
    }

    /// Render and run every command of the list field `key`, stopping at the
    /// first failure.
    pub(crate) fn run_list(&mut self, key: &str, report: &mut OperationReport) -> Result<()> {
        let commands = self.config.string_list(key);
        if commands.is_empty() {
            debug!(key, "nothing to run");
            return Ok(());
        }
        for template in commands {
            let line = self.config.render_runtime(&template, &self.runtime)?;
            self.execute(&line)?.into_result(&line)?;
            report.note(format!("ran: {line}"));
            report.changed = true;
        }
        Ok(())
    }

    /// Apply `manifest` with puppet and run `playbook` with ansible, when the
    /// document names them.
    pub(crate) fn apply_configuration(&mut self, report: &mut OperationReport) -> Result<()> {
        let config = self.config;
        let tools = self.tools;
        let facts = config.facts(Some(&self.runtime));

        if let Some(manifest) = config.non_empty("manifest") {
            let manifest = config.resolve_path(manifest);
            let options = ApplyOptions {
                modules: config
                    .string_list("puppet_modules")
                    .iter()
                    .map(|m| config.resolve_path(m))
                    .collect(),
                templates: config
                    .string_list("templates")
                    .iter()
                    .map(|t| config.resolve_path(t))
                    .collect(),
                staging_dir: tools.settings.remote_staging_dir.clone(),
            };
            let session = self.session()?;
            tools
                .config_manager
                .apply(session, &manifest, &facts, &options)?;
            report.note(format!("applied manifest {}", manifest.display()));
            report.changed = true;
        }

        if let Some(playbook) = config.non_empty("playbook") {
            let playbook = config.resolve_path(playbook);
            let target = self.target.as_ref().ok_or_else(|| {
                DrydockError::Collaborator("playbooks need a remote host".into())
            })?;
            tools.playbooks.run(&playbook, target, &facts)?;
            report.note(format!("ran playbook {}", playbook.display()));
            report.changed = true;
        }
        Ok(())
    }

    /// Run every `check_list` entry. Failing checks are outcomes, not errors;
    /// malformed entries and unrenderable templates are errors.
    pub(crate) fn run_checks(&mut self) -> Result<Vec<CheckOutcome>> {
        let entries: Vec<HealthCheck> = self
            .config
            .dict_list("check_list")
            .into_iter()
            .map(HealthCheck::from_entry)
            .collect::<Result<_>>()?;

        let mut outcomes = Vec::with_capacity(entries.len());
        for check in entries {
            let rendered = self.config.render_runtime(check.template(), &self.runtime)?;
            let outcome = match check {
                HealthCheck::Http {
                    expect,
                    retries,
                    interval_secs,
                    ..
                } => self.probe_http(&rendered, expect, retries, interval_secs),
                HealthCheck::Command { expect, .. } => {
                    let out = self.execute(&rendered)?;
                    CheckOutcome {
                        kind: "command",
                        target: rendered,
                        passed: out.status == expect,
                        detail: format!("exit {} (expected {expect})", out.status),
                    }
                }
            };
            info!(kind = outcome.kind, target = %outcome.target, passed = outcome.passed, "health check");
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn probe_http(&self, url: &str, expect: u16, retries: u32, interval_secs: u64) -> CheckOutcome {
        let attempts = retries.max(1);
        let mut detail = String::new();
        for attempt in 1..=attempts {
            match self.tools.probe.http_status(url) {
                Ok(status) if status == expect => {
                    return CheckOutcome {
                        kind: "http",
                        target: url.to_string(),
                        passed: true,
                        detail: format!("status {status}"),
                    };
                }
                Ok(status) => detail = format!("status {status} (expected {expect})"),
                Err(e) => detail = e.to_string(),
            }
            if attempt < attempts {
                thread::sleep(Duration::from_secs(interval_secs));
            }
        }
        CheckOutcome {
            kind: "http",
            target: url.to_string(),
            passed: false,
            detail,
        }
    }
}
