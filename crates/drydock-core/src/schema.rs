//! Structural schema registry.
//!
//! Four document shapes are recognized. [`choose_schema`] picks one from the
//! raw document and [`SchemaDescriptor::validate`] checks every field against
//! it. Defaults are applied separately by [`crate::defaults`].

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::document::Document;
use crate::error::{DrydockError, Result};
use crate::validators;

pub const EXTENDS_KEY: &str = "extends";
pub const INSTANCE_TYPE_KEY: &str = "instance_type";
pub const SERVICE_DEFAULTS_KEY: &str = "service_defaults";

/// `instance_type` values that select the managed-platform schema.
pub const MANAGED_PLATFORM_ALIASES: &[&str] = &["heroku", "paas", "managed"];

/// `instance_type` value that selects the local-VM schema.
pub const LOCAL_VM_TYPE: &str = "vagrant";

/// Sub-keys every local VM definition must carry.
pub const VM_KEYS: &[&str] = &["box", "ip", "memory"];

// ---------------------------------------------------------------------------
// SchemaKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaKind {
    Default,
    ManagedPlatform,
    LocalVm,
    Extension,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Default => "default",
            SchemaKind::ManagedPlatform => "managed-platform",
            SchemaKind::LocalVm => "local-vm",
            SchemaKind::Extension => "extension",
        }
    }

    pub fn all() -> &'static [SchemaKind] {
        &[
            SchemaKind::Default,
            SchemaKind::ManagedPlatform,
            SchemaKind::LocalVm,
            SchemaKind::Extension,
        ]
    }

    pub fn parse(s: &str) -> Option<SchemaKind> {
        SchemaKind::all().iter().copied().find(|k| k.as_str() == s)
    }

    pub fn descriptor(&self) -> &'static SchemaDescriptor {
        descriptor(*self)
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Field descriptions
// ---------------------------------------------------------------------------

/// Shape check applied to a field's value.
#[derive(Debug, Clone, Copy)]
pub enum Check {
    String,
    Bool,
    Dict,
    Port,
    ListOfStrings,
    ListOfDicts,
    NestedObject(&'static [&'static str]),
    FilePath,
    EnumEquals(&'static str),
    OneOf(&'static [&'static str]),
}

impl Check {
    pub fn apply(&self, key: &str, value: &Value, base: &Path) -> Result<()> {
        match self {
            Check::String => validators::string(key, value),
            Check::Bool => validators::boolean(key, value),
            Check::Dict => validators::dict(key, value),
            Check::Port => validators::port_like(key, value),
            Check::ListOfStrings => validators::list_of_strings(key, value),
            Check::ListOfDicts => validators::list_of_dicts(key, value),
            Check::NestedObject(keys) => validators::nested_object_has_keys(key, value, keys),
            Check::FilePath => validators::file_path_exists(key, value, base),
            Check::EnumEquals(allowed) => validators::enum_equals(key, value, allowed),
            Check::OneOf(allowed) => validators::one_of(key, value, allowed),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Check::String => "string".to_string(),
            Check::Bool => "bool".to_string(),
            Check::Dict => "dict".to_string(),
            Check::Port => "port".to_string(),
            Check::ListOfStrings => "list<string>".to_string(),
            Check::ListOfDicts => "list<dict>".to_string(),
            Check::NestedObject(keys) => format!("dict{{{}}}", keys.join(",")),
            Check::FilePath => "file".to_string(),
            Check::EnumEquals(v) => format!("\"{v}\""),
            Check::OneOf(vs) => vs.join("|"),
        }
    }
}

/// Default for an optional field. Factories build a fresh value on every
/// call so documents never share a mutable default.
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Str(&'static str),
    Int(i64),
    Bool(bool),
    Factory(fn() -> Value),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Str(s) => Value::String((*s).to_string()),
            DefaultValue::Int(n) => json!(n),
            DefaultValue::Bool(b) => Value::Bool(*b),
            DefaultValue::Factory(f) => f(),
        }
    }
}

fn empty_list() -> Value {
    Value::Array(Vec::new())
}

fn empty_dict() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Copy)]
pub enum Requirement {
    Required,
    Default(DefaultValue),
    Optional,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub key: &'static str,
    pub requirement: Requirement,
    pub check: Check,
}

impl FieldSpec {
    const fn required(key: &'static str, check: Check) -> Self {
        Self {
            key,
            requirement: Requirement::Required,
            check,
        }
    }

    const fn default(key: &'static str, check: Check, default: DefaultValue) -> Self {
        Self {
            key,
            requirement: Requirement::Default(default),
            check,
        }
    }

    const fn optional(key: &'static str, check: Check) -> Self {
        Self {
            key,
            requirement: Requirement::Optional,
            check,
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    pub kind: SchemaKind,
    pub fields: Vec<FieldSpec>,
    /// Whether keys outside `fields` are accepted.
    pub allow_extra: bool,
}

impl SchemaDescriptor {
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Every structural problem in `doc`, in field order. Relative file
    /// paths resolve against `base`.
    pub fn errors(&self, doc: &Document, base: &Path) -> Vec<String> {
        let mut errors = Vec::new();

        for field in &self.fields {
            match doc.get(field.key) {
                None => {
                    if matches!(field.requirement, Requirement::Required) {
                        errors.push(format!("missing required key `{}`", field.key));
                    }
                }
                Some(value) => {
                    if let Err(e) = field.check.apply(field.key, value, base) {
                        errors.push(match e {
                            DrydockError::Invalid(msg) => msg,
                            other => other.to_string(),
                        });
                    }
                }
            }
        }

        if !self.allow_extra {
            for key in doc.keys() {
                if self.field(key).is_none() {
                    errors.push(format!("unexpected key `{key}`"));
                }
            }
        }

        errors
    }

    /// Fails with [`DrydockError::SchemaInvalid`] listing every problem.
    pub fn validate(&self, doc: &Document, base: &Path) -> Result<()> {
        let errors = self.errors(doc, base);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DrydockError::SchemaInvalid {
                schema: self.kind.as_str().to_string(),
                errors,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Pick the schema for a raw document. Never fails: an unknown
/// `instance_type` falls through to the default schema.
pub fn choose_schema(doc: &Document) -> SchemaKind {
    if doc.contains_key(EXTENDS_KEY) {
        return SchemaKind::Extension;
    }
    match doc.get(INSTANCE_TYPE_KEY).and_then(Value::as_str) {
        Some(t) if MANAGED_PLATFORM_ALIASES.contains(&t) => SchemaKind::ManagedPlatform,
        Some(t) if t == LOCAL_VM_TYPE => SchemaKind::LocalVm,
        _ => SchemaKind::Default,
    }
}

pub fn descriptor(kind: SchemaKind) -> &'static SchemaDescriptor {
    static DEFAULT: OnceLock<SchemaDescriptor> = OnceLock::new();
    static MANAGED: OnceLock<SchemaDescriptor> = OnceLock::new();
    static LOCAL_VM: OnceLock<SchemaDescriptor> = OnceLock::new();
    static EXTENSION: OnceLock<SchemaDescriptor> = OnceLock::new();

    match kind {
        SchemaKind::Default => DEFAULT.get_or_init(default_schema),
        SchemaKind::ManagedPlatform => MANAGED.get_or_init(managed_platform_schema),
        SchemaKind::LocalVm => LOCAL_VM.get_or_init(local_vm_schema),
        SchemaKind::Extension => EXTENSION.get_or_init(extension_schema),
    }
}

fn lifecycle_fields() -> Vec<FieldSpec> {
    use DefaultValue::Factory;
    vec![
        FieldSpec::default("setup_list", Check::ListOfStrings, Factory(empty_list)),
        FieldSpec::default("provision_list", Check::ListOfStrings, Factory(empty_list)),
        FieldSpec::default("check_list", Check::ListOfDicts, Factory(empty_list)),
    ]
}

fn configuration_management_fields() -> Vec<FieldSpec> {
    use DefaultValue::Factory;
    vec![
        FieldSpec::optional("manifest", Check::FilePath),
        FieldSpec::default("templates", Check::ListOfStrings, Factory(empty_list)),
        FieldSpec::default("puppet_modules", Check::ListOfStrings, Factory(empty_list)),
        FieldSpec::optional("playbook", Check::String),
    ]
}

fn service_defaults_field() -> FieldSpec {
    FieldSpec::default(
        SERVICE_DEFAULTS_KEY,
        Check::Dict,
        DefaultValue::Factory(empty_dict),
    )
}

fn default_schema() -> SchemaDescriptor {
    use DefaultValue::{Bool, Factory, Int, Str};
    let mut fields = vec![
        FieldSpec::required("name", Check::String),
        FieldSpec::required(INSTANCE_TYPE_KEY, Check::String),
        FieldSpec::required("ami", Check::String),
        FieldSpec::required("key_name", Check::String),
        FieldSpec::default("region", Check::String, Str("us-east-1")),
        FieldSpec::default("username", Check::String, Str("ubuntu")),
        FieldSpec::default("port", Check::Port, Int(22)),
        FieldSpec::default("pem", Check::String, Str("~/.ssh/{{key_name}}.pem")),
        FieldSpec::default("security_groups", Check::ListOfDicts, Factory(empty_list)),
        FieldSpec::default("tags", Check::Dict, Factory(empty_dict)),
        FieldSpec::default("detailed_monitoring", Check::Bool, Bool(false)),
        FieldSpec::default("elastic_ip", Check::String, Str("")),
        FieldSpec::default("bucket", Check::String, Str("")),
    ];
    fields.extend(lifecycle_fields());
    fields.extend(configuration_management_fields());
    fields.push(service_defaults_field());
    SchemaDescriptor {
        kind: SchemaKind::Default,
        fields,
        allow_extra: false,
    }
}

fn managed_platform_schema() -> SchemaDescriptor {
    use DefaultValue::{Bool, Factory, Str};
    let mut fields = vec![
        FieldSpec::required("name", Check::String),
        FieldSpec::required(INSTANCE_TYPE_KEY, Check::OneOf(MANAGED_PLATFORM_ALIASES)),
        FieldSpec::required("api_key", Check::String),
        FieldSpec::default("region", Check::String, Str("us")),
        FieldSpec::default("stack", Check::String, Str("")),
        FieldSpec::default("config_vars", Check::Dict, Factory(empty_dict)),
        FieldSpec::default("addons", Check::ListOfStrings, Factory(empty_list)),
        FieldSpec::default("maintenance", Check::Bool, Bool(false)),
    ];
    fields.extend(lifecycle_fields());
    fields.push(service_defaults_field());
    SchemaDescriptor {
        kind: SchemaKind::ManagedPlatform,
        fields,
        allow_extra: false,
    }
}

fn local_vm_schema() -> SchemaDescriptor {
    use DefaultValue::{Int, Str};
    let mut fields = vec![
        FieldSpec::required("name", Check::String),
        FieldSpec::required(INSTANCE_TYPE_KEY, Check::EnumEquals(LOCAL_VM_TYPE)),
        FieldSpec::required("vm", Check::NestedObject(VM_KEYS)),
        FieldSpec::default("username", Check::String, Str("vagrant")),
        FieldSpec::default("port", Check::Port, Int(22)),
        FieldSpec::default(
            "pem",
            Check::String,
            Str("~/.vagrant.d/insecure_private_key"),
        ),
    ];
    fields.extend(lifecycle_fields());
    fields.extend(configuration_management_fields());
    fields.push(service_defaults_field());
    SchemaDescriptor {
        kind: SchemaKind::LocalVm,
        fields,
        allow_extra: false,
    }
}

fn extension_schema() -> SchemaDescriptor {
    SchemaDescriptor {
        kind: SchemaKind::Extension,
        fields: vec![FieldSpec::required(EXTENDS_KEY, Check::String)],
        allow_extra: true,
    }
}
