//! Cloud instance collaborator, backed by the `aws` CLI.

use std::collections::BTreeMap;
use std::process::Command;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{DrydockError, Result};
use crate::shell::{self, CommandOutput};

/// Instance states that still count as "this service exists".
pub const LIVE_STATES: &[&str] = &["pending", "running", "stopping", "stopped"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub state: String,
    pub public_ip: Option<String>,
    pub public_dns: Option<String>,
    pub private_ip: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    /// Best address to reach the instance from outside.
    pub fn address(&self) -> Option<&str> {
        self.public_ip
            .as_deref()
            .or(self.public_dns.as_deref().filter(|d| !d.is_empty()))
            .or(self.private_ip.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstanceSpec {
    pub name: String,
    pub ami: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
    pub detailed_monitoring: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

/// One ingress rule of a security group definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

/// A security group as declared in a service document:
/// `{"name": "web", "description": "...", "rules": [{"protocol": "tcp", "port": 80, "cidr": "0.0.0.0/0"}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    pub rules: Vec<IngressRule>,
}

impl SecurityGroupSpec {
    pub fn from_entry(entry: &Map<String, Value>) -> Result<Self> {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DrydockError::Invalid("security group entry has no `name`".into()))?;
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{name} (managed by drydock)"));

        let mut rules = Vec::new();
        if let Some(raw) = entry.get("rules").and_then(Value::as_array) {
            for (i, rule) in raw.iter().enumerate() {
                let rule = rule.as_object().ok_or_else(|| {
                    DrydockError::Invalid(format!("security group `{name}` rule {i} is not a dict"))
                })?;
                rules.push(IngressRule::from_entry(name, i, rule)?);
            }
        }

        Ok(Self {
            name: name.to_string(),
            description,
            rules,
        })
    }
}

impl IngressRule {
    fn from_entry(group: &str, index: usize, rule: &Map<String, Value>) -> Result<Self> {
        let port = |key: &str| -> Result<Option<u16>> {
            let Some(raw) = rule.get(key) else {
                return Ok(None);
            };
            let parsed = match raw {
                Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            parsed.map(Some).ok_or_else(|| {
                DrydockError::Invalid(format!(
                    "security group `{group}` rule {index}: `{key}` is not a port"
                ))
            })
        };

        let single = port("port")?;
        let from_port = port("from_port")?.or(single).ok_or_else(|| {
            DrydockError::Invalid(format!(
                "security group `{group}` rule {index} needs `port` or `from_port`"
            ))
        })?;
        let to_port = port("to_port")?.or(single).unwrap_or(from_port);

        Ok(Self {
            protocol: rule
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or("tcp")
                .to_string(),
            from_port,
            to_port,
            cidr: rule
                .get("cidr")
                .and_then(Value::as_str)
                .unwrap_or("0.0.0.0/0")
                .to_string(),
        })
    }
}

pub trait CloudProvider {
    fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>>;
    fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance>;
    fn terminate_instance(&self, id: &str) -> Result<()>;
    fn tag_instance(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<()>;
    fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>>;
    /// Create the group if needed and make sure every rule is authorized.
    fn sync_security_group(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroup>;
    fn find_key_pair(&self, name: &str) -> Result<bool>;
    fn associate_address(&self, instance_id: &str, address: &str) -> Result<()>;
    fn create_bucket(&self, name: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// aws CLI implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AwsCli {
    profile: Option<String>,
    region: String,
}

impl AwsCli {
    pub fn new(profile: Option<String>, region: &str) -> Self {
        Self {
            profile,
            region: region.to_string(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("aws");
        cmd.args(args)
            .args(["--region", self.region.as_str(), "--output", "json"]);
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile.as_str()]);
        }
        cmd
    }

    fn call(&self, args: &[&str]) -> Result<CommandOutput> {
        shell::require_tool("aws")?;
        let mut cmd = self.command(args);
        shell::capture(&mut cmd, &display(args))
    }

    fn call_ok(&self, args: &[&str]) -> Result<Value> {
        let out = self.call(args)?.into_result(&display(args))?;
        if out.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&out.stdout)?)
    }

    fn describe(&self, filters: &[String]) -> Result<Vec<Instance>> {
        let mut args = vec!["ec2", "describe-instances", "--filters"];
        args.extend(filters.iter().map(String::as_str));
        let value = self.call_ok(&args)?;
        Ok(parse_reservations(&value))
    }
}

impl CloudProvider for AwsCli {
    fn find_instance_by_name(&self, name: &str) -> Result<Option<Instance>> {
        let filters = vec![
            format!("Name=tag:Name,Values={name}"),
            format!("Name=instance-state-name,Values={}", LIVE_STATES.join(",")),
        ];
        let mut found = self.describe(&filters)?;
        debug!(name, count = found.len(), "instance lookup");
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.remove(0))
        })
    }

    fn create_instance(&self, spec: &InstanceSpec) -> Result<Instance> {
        info!(name = %spec.name, ami = %spec.ami, "launching instance");
        let tags = format!(
            "ResourceType=instance,Tags=[{{Key=Name,Value={}}}]",
            spec.name
        );
        let monitoring = format!("Enabled={}", spec.detailed_monitoring);
        let mut args = vec![
            "ec2",
            "run-instances",
            "--image-id",
            spec.ami.as_str(),
            "--instance-type",
            spec.instance_type.as_str(),
            "--key-name",
            spec.key_name.as_str(),
            "--count",
            "1",
            "--monitoring",
            monitoring.as_str(),
            "--tag-specifications",
            tags.as_str(),
        ];
        if !spec.security_group_ids.is_empty() {
            args.push("--security-group-ids");
            args.extend(spec.security_group_ids.iter().map(String::as_str));
        }
        let launched = self.call_ok(&args)?;
        let id = launched["Instances"][0]["InstanceId"]
            .as_str()
            .ok_or_else(|| DrydockError::Collaborator("run-instances returned no instance id".into()))?
            .to_string();

        self.call_ok(&["ec2", "wait", "instance-running", "--instance-ids", &id])?;

        let mut found = self.describe(&[format!("Name=instance-id,Values={id}")])?;
        if found.is_empty() {
            return Err(DrydockError::InstanceNotFound(spec.name.clone()));
        }
        Ok(found.remove(0))
    }

    fn terminate_instance(&self, id: &str) -> Result<()> {
        info!(id, "terminating instance");
        self.call_ok(&["ec2", "terminate-instances", "--instance-ids", id])?;
        Ok(())
    }

    fn tag_instance(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        let pairs: Vec<String> = tags
            .iter()
            .map(|(k, v)| format!("Key={k},Value={v}"))
            .collect();
        let mut args = vec!["ec2", "create-tags", "--resources", id, "--tags"];
        args.extend(pairs.iter().map(String::as_str));
        self.call_ok(&args)?;
        Ok(())
    }

    fn find_security_group(&self, name: &str) -> Result<Option<SecurityGroup>> {
        let filter = format!("Name=group-name,Values={name}");
        let value = self.call_ok(&["ec2", "describe-security-groups", "--filters", &filter])?;
        Ok(value["SecurityGroups"]
            .as_array()
            .and_then(|groups| groups.first())
            .and_then(|g| {
                Some(SecurityGroup {
                    id: g["GroupId"].as_str()?.to_string(),
                    name: g["GroupName"].as_str()?.to_string(),
                })
            }))
    }

    fn sync_security_group(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroup> {
        let group = match self.find_security_group(&spec.name)? {
            Some(g) => g,
            None => {
                info!(group = %spec.name, "creating security group");
                let created = self.call_ok(&[
                    "ec2",
                    "create-security-group",
                    "--group-name",
                    &spec.name,
                    "--description",
                    &spec.description,
                ])?;
                SecurityGroup {
                    id: created["GroupId"]
                        .as_str()
                        .ok_or_else(|| {
                            DrydockError::Collaborator("create-security-group returned no id".into())
                        })?
                        .to_string(),
                    name: spec.name.clone(),
                }
            }
        };

        for rule in &spec.rules {
            let ports = if rule.from_port == rule.to_port {
                rule.from_port.to_string()
            } else {
                format!("{}-{}", rule.from_port, rule.to_port)
            };
            let out = self.call(&[
                "ec2",
                "authorize-security-group-ingress",
                "--group-id",
                &group.id,
                "--protocol",
                &rule.protocol,
                "--port",
                &ports,
                "--cidr",
                &rule.cidr,
            ])?;
            if !out.success() && !out.stderr.contains("InvalidPermission.Duplicate") {
                out.into_result("aws ec2 authorize-security-group-ingress")?;
            }
        }
        Ok(group)
    }

    fn find_key_pair(&self, name: &str) -> Result<bool> {
        let out = self.call(&["ec2", "describe-key-pairs", "--key-names", name])?;
        if out.success() {
            return Ok(true);
        }
        if out.stderr.contains("InvalidKeyPair.NotFound") {
            return Ok(false);
        }
        out.into_result("aws ec2 describe-key-pairs").map(|_| false)
    }

    fn associate_address(&self, instance_id: &str, address: &str) -> Result<()> {
        info!(instance_id, address, "associating elastic ip");
        self.call_ok(&[
            "ec2",
            "associate-address",
            "--instance-id",
            instance_id,
            "--public-ip",
            address,
        ])?;
        Ok(())
    }

    fn create_bucket(&self, name: &str) -> Result<()> {
        let out = self.call(&["s3api", "head-bucket", "--bucket", name])?;
        if out.success() {
            debug!(bucket = name, "bucket already exists");
            return Ok(());
        }
        info!(bucket = name, "creating bucket");
        let mut args = vec!["s3api", "create-bucket", "--bucket", name];
        let constraint = format!("LocationConstraint={}", self.region);
        if self.region != "us-east-1" {
            args.push("--create-bucket-configuration");
            args.push(&constraint);
        }
        self.call_ok(&args)?;
        Ok(())
    }
}

/// `aws <service> <operation>`, for logs and errors.
fn display(args: &[&str]) -> String {
    format!("aws {}", args.iter().take(2).copied().collect::<Vec<_>>().join(" "))
}

/// Flatten `describe-instances` output into instances.
pub fn parse_reservations(value: &Value) -> Vec<Instance> {
    let mut out = Vec::new();
    let Some(reservations) = value["Reservations"].as_array() else {
        return out;
    };
    for reservation in reservations {
        let Some(instances) = reservation["Instances"].as_array() else {
            continue;
        };
        for raw in instances {
            let Some(id) = raw["InstanceId"].as_str() else {
                continue;
            };
            let tags: BTreeMap<String, String> = raw["Tags"]
                .as_array()
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| {
                            Some((t["Key"].as_str()?.to_string(), t["Value"].as_str()?.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            let text = |key: &str| raw[key].as_str().map(str::to_string);
            out.push(Instance {
                id: id.to_string(),
                name: tags.get("Name").cloned().unwrap_or_default(),
                state: raw["State"]["Name"].as_str().unwrap_or("unknown").to_string(),
                public_ip: text("PublicIpAddress"),
                public_dns: text("PublicDnsName"),
                private_ip: text("PrivateIpAddress"),
                tags,
            });
        }
    }
    out
}
