//! Default filling for optional schema fields.
//!
//! Safe to run repeatedly: a second pass over an already-filled document
//! changes nothing. The loader relies on that and runs it both before and
//! after reflection.

use serde_json::Value;
use tracing::debug;

use crate::document::Document;
use crate::schema::{Check, Requirement, SchemaDescriptor};

/// Insert defaults for absent optional fields and canonicalize port-like
/// values to strings. Returns the keys that were defaulted.
pub fn fill_defaults(schema: &SchemaDescriptor, doc: &mut Document) -> Vec<&'static str> {
    let mut applied = Vec::new();

    for field in &schema.fields {
        if let Requirement::Default(default) = field.requirement {
            if !doc.contains_key(field.key) {
                doc.insert(field.key.to_string(), default.produce());
                applied.push(field.key);
            }
        }

        if matches!(field.check, Check::Port) {
            if let Some(value) = doc.get_mut(field.key) {
                canonicalize_port(value);
            }
        }
    }

    if !applied.is_empty() {
        debug!(schema = %schema.kind, keys = ?applied, "applied schema defaults");
    }
    applied
}

fn canonicalize_port(value: &mut Value) {
    match value {
        Value::Number(n) => {
            *value = Value::String(n.to_string());
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *value = Value::String(trimmed.to_string());
            }
        }
        _ => {}
    }
}
