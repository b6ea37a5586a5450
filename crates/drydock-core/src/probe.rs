//! Health checks: the `check_list` entry format and the HTTP probe.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::type_name;
use crate::error::{DrydockError, Result};

/// Check types a `check_list` entry may name.
pub const CHECK_TYPES: &[&str] = &["http", "command"];

/// One parsed `check_list` entry. Templates are kept unrendered; they are
/// filled in once runtime facts exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheck {
    Http {
        url: String,
        expect: u16,
        retries: u32,
        interval_secs: u64,
    },
    Command {
        command: String,
        expect: i32,
    },
}

impl HealthCheck {
    pub fn from_entry(entry: &Map<String, Value>) -> Result<Self> {
        let kind = entry
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DrydockError::Invalid("health check has no `type`".into()))?;

        match kind {
            "http" => Ok(HealthCheck::Http {
                url: required_str(entry, "url")?,
                expect: int_field(entry, "expect", 200)?,
                retries: int_field(entry, "retries", 3)?,
                interval_secs: int_field(entry, "interval", 2)?,
            }),
            "command" => Ok(HealthCheck::Command {
                command: required_str(entry, "command")?,
                expect: int_field(entry, "expect", 0)?,
            }),
            other => Err(DrydockError::Invalid(format!(
                "unknown health check type '{other}' (expected one of: {})",
                CHECK_TYPES.join(", ")
            ))),
        }
    }

    /// The template string this check renders at run time.
    pub fn template(&self) -> &str {
        match self {
            HealthCheck::Http { url, .. } => url,
            HealthCheck::Command { command, .. } => command,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HealthCheck::Http { .. } => "http",
            HealthCheck::Command { .. } => "command",
        }
    }
}

fn required_str(entry: &Map<String, Value>, key: &str) -> Result<String> {
    match entry.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None => Err(DrydockError::Invalid(format!(
            "health check is missing `{key}`"
        ))),
        Some(other) => Err(DrydockError::Invalid(format!(
            "health check `{key}` must be a string, found {}",
            type_name(other)
        ))),
    }
}

fn int_field<T: TryFrom<i64>>(entry: &Map<String, Value>, key: &str, default: T) -> Result<T> {
    let Some(value) = entry.get(key) else {
        return Ok(default);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| DrydockError::Invalid(format!("health check `{key}` is out of range")))
}

/// Outcome of running one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub kind: &'static str,
    pub target: String,
    pub passed: bool,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// HealthProbe
// ---------------------------------------------------------------------------

pub trait HealthProbe {
    /// HTTP status of a GET to `url`. Connection failures are errors, not
    /// statuses.
    fn http_status(&self, url: &str) -> Result<u16>;
}

pub struct HttpProbe {
    client: reqwest::blocking::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("drydock/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpProbe {
    fn http_status(&self, url: &str) -> Result<u16> {
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        debug!(url, status, "probe");
        Ok(status)
    }
}
