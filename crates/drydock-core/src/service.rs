//! The resolved service configuration handed to lifecycle operations.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::{scalar_text, Document};
use crate::error::Result;
use crate::paths;
use crate::reflect;
use crate::schema::{SchemaDescriptor, SchemaKind, SERVICE_DEFAULTS_KEY};

// ---------------------------------------------------------------------------
// ServiceClass
// ---------------------------------------------------------------------------

/// Behavioral class of a resolved document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    CloudInstance,
    ManagedPlatform,
    LocalVm,
}

impl ServiceClass {
    /// Class for a terminal (non-extension) schema.
    pub fn for_schema(kind: SchemaKind) -> Option<ServiceClass> {
        match kind {
            SchemaKind::Default => Some(ServiceClass::CloudInstance),
            SchemaKind::ManagedPlatform => Some(ServiceClass::ManagedPlatform),
            SchemaKind::LocalVm => Some(ServiceClass::LocalVm),
            SchemaKind::Extension => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::CloudInstance => "cloud-instance",
            ServiceClass::ManagedPlatform => "managed-platform",
            ServiceClass::LocalVm => "local-vm",
        }
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuntimeFacts
// ---------------------------------------------------------------------------

/// Deployment-time values that fill the lazy template variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeFacts {
    pub host: String,
    pub username: Option<String>,
    pub pem: Option<String>,
}

impl RuntimeFacts {
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("host", self.host.clone())];
        if let Some(u) = &self.username {
            out.push(("username", u.clone()));
        }
        if let Some(p) = &self.pem {
            out.push(("pem", p.clone()));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// A fully loaded service document. Read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfig {
    name: String,
    kind: SchemaKind,
    class: ServiceClass,
    source: PathBuf,
    base_dir: PathBuf,
    chain: Vec<PathBuf>,
    document: Document,
    schema_errors: Vec<String>,
}

impl ServiceConfig {
    pub(crate) fn new(
        kind: SchemaKind,
        class: ServiceClass,
        source: PathBuf,
        chain: Vec<PathBuf>,
        document: Document,
        schema_errors: Vec<String>,
    ) -> Self {
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "service".to_string())
            });
        let base_dir = paths::document_dir(&source);
        Self {
            name,
            kind,
            class,
            source,
            base_dir,
            chain,
            document,
            schema_errors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn schema(&self) -> &'static SchemaDescriptor {
        self.kind.descriptor()
    }

    pub fn class(&self) -> ServiceClass {
        self.class
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Files merged into this configuration, starting with the source.
    pub fn chain(&self) -> &[PathBuf] {
        &self.chain
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Structural problems collected when loading with `die = false`.
    pub fn schema_errors(&self) -> &[String] {
        &self.schema_errors
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.document.get(key).and_then(Value::as_str)
    }

    /// A string field, treating the empty string as absent.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.str_value(key).filter(|s| !s.trim().is_empty())
    }

    pub fn bool_value(&self, key: &str) -> bool {
        self.document
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.document
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dict_list(&self, key: &str) -> Vec<&Map<String, Value>> {
        self.document
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }

    /// A mapping field flattened to string pairs.
    pub fn string_map(&self, key: &str) -> BTreeMap<String, String> {
        self.document
            .get(key)
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), scalar_text(v)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `raw` with `~` expanded and anchored at the source document's
    /// directory.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        paths::expand_path(raw, &self.base_dir)
    }

    /// SSH port as a number. Ports are stored as canonical strings.
    pub fn port(&self) -> u16 {
        self.str_value("port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(22)
    }

    /// The template context with runtime facts laid over it.
    pub fn runtime_context(&self, runtime: &RuntimeFacts) -> Document {
        let mut context = reflect::build_context(&self.document);
        for (key, value) in runtime.pairs() {
            context.insert(key.to_string(), Value::String(value));
        }
        context
    }

    /// Render a deferred template now that runtime facts are known.
    pub fn render_runtime(&self, template: &str, runtime: &RuntimeFacts) -> Result<String> {
        reflect::render_runtime(template, &self.runtime_context(runtime))
    }

    /// The key/value set exposed to configuration management: scalar
    /// top-level fields, then `service_defaults`, then runtime facts. Later
    /// sources win.
    pub fn facts(&self, runtime: Option<&RuntimeFacts>) -> BTreeMap<String, String> {
        let mut facts = BTreeMap::new();
        for (key, value) in &self.document {
            if matches!(value, Value::Array(_) | Value::Object(_)) {
                continue;
            }
            facts.insert(key.clone(), scalar_text(value));
        }
        if let Some(Value::Object(defaults)) = self.document.get(SERVICE_DEFAULTS_KEY) {
            for (key, value) in defaults {
                facts.insert(key.clone(), scalar_text(value));
            }
        }
        if let Some(runtime) = runtime {
            for (key, value) in runtime.pairs() {
                facts.insert(key.to_string(), value);
            }
        }
        facts
    }

    /// Names that facts can ever define for this service, including the
    /// runtime ones that are only filled at deploy time.
    pub fn fact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.facts(None).into_keys().collect();
        for lazy in reflect::LAZY_VARIABLES {
            if !names.iter().any(|n| n == lazy) {
                names.push((*lazy).to_string());
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) fn config_from(value: Value) -> ServiceConfig {
    let document = value.as_object().cloned().unwrap_or_default();
    let kind = crate::schema::choose_schema(&document);
    let class = ServiceClass::for_schema(kind).unwrap_or(ServiceClass::CloudInstance);
    ServiceConfig::new(
        kind,
        class,
        PathBuf::from("/srv/services/service.json"),
        vec![PathBuf::from("/srv/services/service.json")],
        document,
        Vec::new(),
    )
}
