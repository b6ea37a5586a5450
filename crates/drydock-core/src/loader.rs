//! Load pipeline: file → schema → validation → extension → defaults →
//! reflection → defaults again → behavioral class.

use std::path::Path;

use tracing::{debug, warn};

use crate::defaults::fill_defaults;
use crate::document::read_document;
use crate::error::{DrydockError, Result};
use crate::extension::ExtensionChain;
use crate::paths;
use crate::document::Document;
use crate::reflect::{build_context, reflect, reflect_value, ReflectMode};
use crate::schema::{choose_schema, SchemaKind};
use crate::service::{ServiceClass, ServiceConfig};

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub mode: ReflectMode,
    /// When false, structural errors are collected on the returned
    /// configuration instead of aborting the load.
    pub die: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: ReflectMode::Simple,
            die: true,
        }
    }
}

impl LoadOptions {
    pub fn strict() -> Self {
        Self {
            mode: ReflectMode::Strict,
            die: true,
        }
    }

    /// Collect structural errors rather than failing on them.
    pub fn collecting() -> Self {
        Self {
            mode: ReflectMode::Simple,
            die: false,
        }
    }
}

/// Load and fully resolve the service document at `path`.
///
/// Missing or malformed files, cyclic or broken `extends` chains and
/// reflection errors always fail. Structural schema errors fail unless
/// `options.die` is false.
pub fn load(path: &Path, options: LoadOptions) -> Result<ServiceConfig> {
    let mut doc = read_document(path)?;
    let origin_dir = paths::document_dir(path);
    let mut extends_base = origin_dir.clone();
    let mut chain = ExtensionChain::new(path);
    let mut collected = Vec::new();

    let kind = loop {
        let kind = choose_schema(&doc);
        debug!(schema = %kind, "chose schema");

        let errors = kind.descriptor().errors(&doc, &origin_dir);
        if !errors.is_empty() {
            if options.die || kind == SchemaKind::Extension {
                return Err(DrydockError::SchemaInvalid {
                    schema: kind.as_str().to_string(),
                    errors,
                });
            }
            for e in &errors {
                warn!(schema = %kind, "{e}");
            }
            collected.extend(errors);
        }

        if kind != SchemaKind::Extension {
            break kind;
        }
        let hop = chain.step(&doc, &extends_base)?;
        doc = hop.document;
        extends_base = hop.base;
    };

    let schema = kind.descriptor();
    let applied = fill_defaults(schema, &mut doc);
    let unrenderable = if options.die {
        Vec::new()
    } else {
        drop_unrenderable_defaults(&mut doc, &applied, options.mode, &mut collected)
    };
    let mut resolved = reflect(&doc, options.mode)?;
    fill_defaults(schema, &mut resolved);
    for key in &unrenderable {
        resolved.remove(*key);
    }

    let class = ServiceClass::for_schema(kind).ok_or_else(|| {
        DrydockError::Invalid(format!("schema {kind} has no behavioral class"))
    })?;
    debug!(class = %class, files = chain.visited().len(), "service document resolved");

    Ok(ServiceConfig::new(
        kind,
        class,
        path.to_path_buf(),
        chain.visited().to_vec(),
        resolved,
        collected,
    ))
}

/// Remove defaulted values whose templates cannot render, typically because
/// a required key they refer to is missing. Each failure becomes a collected
/// error so the load can go on reporting the rest.
fn drop_unrenderable_defaults(
    doc: &mut Document,
    applied: &[&'static str],
    mode: ReflectMode,
    collected: &mut Vec<String>,
) -> Vec<&'static str> {
    let context = build_context(doc);
    let mut dropped = Vec::new();
    for &key in applied {
        let Some(value) = doc.get(key) else { continue };
        if let Err(e) = reflect_value(value, &context, mode) {
            warn!(key, "default cannot be rendered: {e}");
            collected.push(format!("default for `{key}` cannot be rendered: {e}"));
            dropped.push(key);
        }
    }
    for key in &dropped {
        doc.remove(*key);
    }
    dropped
}
