use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::paths;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tool-wide settings. Separate from service documents: these describe how
/// drydock talks to hosts, not what a service looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_ssh_retries")]
    pub ssh_retries: u32,
    #[serde(default = "default_ssh_retry_delay")]
    pub ssh_retry_delay_secs: u64,
    #[serde(default = "default_status_cache_ttl")]
    pub status_cache_ttl_secs: u64,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,
    #[serde(default = "default_ssh_options")]
    pub ssh_options: Vec<String>,
    #[serde(default = "default_remote_staging_dir")]
    pub remote_staging_dir: String,
    #[serde(default)]
    pub aws_profile: Option<String>,
}

fn default_ssh_retries() -> u32 {
    5
}

fn default_ssh_retry_delay() -> u64 {
    10
}

fn default_status_cache_ttl() -> u64 {
    30
}

fn default_check_timeout() -> u64 {
    5
}

fn default_ssh_options() -> Vec<String> {
    vec![
        "StrictHostKeyChecking=no".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "ConnectTimeout=10".to_string(),
    ]
}

fn default_remote_staging_dir() -> String {
    "/tmp/drydock".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh_retries: default_ssh_retries(),
            ssh_retry_delay_secs: default_ssh_retry_delay(),
            status_cache_ttl_secs: default_status_cache_ttl(),
            check_timeout_secs: default_check_timeout(),
            ssh_options: default_ssh_options(),
            remote_staging_dir: default_remote_staging_dir(),
            aws_profile: None,
        }
    }
}

impl Settings {
    /// Load settings from `explicit` or `~/.drydock/settings.json`. A missing
    /// file yields the defaults; an explicit path that does not exist does
    /// not. `.yaml`/`.yml` files are read as YAML, everything else as JSON.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match paths::default_settings_path() {
                Some(p) if p.exists() => p,
                _ => {
                    debug!("no settings file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let data = std::fs::read_to_string(&path)?;
        let settings = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&data)?,
            _ => serde_json::from_str(&data)?,
        };
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.ssh_retry_delay_secs)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.ssh_retries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "ssh_retries must be at least 1".to_string(),
            });
        } else if self.ssh_retries > 20 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "ssh_retries={} (>20 is unusual)",
                    self.ssh_retries
                ),
            });
        }

        if self.check_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "check_timeout_secs must be greater than zero".to_string(),
            });
        }

        if !self.remote_staging_dir.starts_with('/') {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "remote_staging_dir '{}' must be an absolute path",
                    self.remote_staging_dir
                ),
            });
        }

        for opt in &self.ssh_options {
            if !opt.contains('=') {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("ssh option '{opt}' is not in Key=Value form"),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_validate_clean() {
        assert!(Settings::default().validate().is_empty());
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"ssh_retries": 2, "aws_profile": "ops"}"#).unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.ssh_retries, 2);
        assert_eq!(s.aws_profile.as_deref(), Some("ops"));
        assert_eq!(s.status_cache_ttl_secs, 30);
        assert_eq!(s.remote_staging_dir, "/tmp/drydock");
    }

    #[test]
    fn yaml_settings_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "check_timeout_secs: 9\n").unwrap();
        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.check_timeout(), Duration::from_secs(9));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/settings.json");
        let mut s = Settings::default();
        s.ssh_retry_delay_secs = 1;
        s.save(&path).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap().retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn validate_flags_bad_values() {
        let s = Settings {
            ssh_retries: 0,
            check_timeout_secs: 0,
            remote_staging_dir: "staging".into(),
            ssh_options: vec!["-v".into()],
            ..Settings::default()
        };
        let warnings = s.validate();
        assert_eq!(warnings.len(), 4);
        assert_eq!(
            warnings.iter().filter(|w| w.level == WarnLevel::Error).count(),
            3
        );
    }
}
