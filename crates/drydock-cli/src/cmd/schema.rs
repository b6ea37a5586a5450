use anyhow::anyhow;
use drydock_core::schema::{Requirement, SchemaKind};
use serde_json::{json, Value};

use crate::output::{print_json, print_table};

pub fn run(kind: Option<&str>, json: bool) -> anyhow::Result<()> {
    let Some(kind) = kind else {
        return list(json);
    };
    let kind = SchemaKind::parse(kind).ok_or_else(|| {
        let known: Vec<&str> = SchemaKind::all().iter().map(|k| k.as_str()).collect();
        anyhow!("unknown schema '{kind}' (expected one of: {})", known.join(", "))
    })?;
    let descriptor = kind.descriptor();

    let rows: Vec<(&str, &str, String, String)> = descriptor
        .fields
        .iter()
        .map(|f| {
            let (requirement, default) = match &f.requirement {
                Requirement::Required => ("required", String::new()),
                Requirement::Default(d) => ("default", default_text(&d.produce())),
                Requirement::Optional => ("optional", String::new()),
            };
            (f.key, requirement, f.check.label(), default)
        })
        .collect();

    if json {
        let fields: Vec<Value> = rows
            .iter()
            .map(|(key, requirement, check, default)| {
                json!({"key": key, "requirement": requirement, "type": check, "default": default})
            })
            .collect();
        return print_json(&json!({
            "schema": kind.as_str(),
            "allow_extra": descriptor.allow_extra,
            "fields": fields,
        }));
    }

    print_table(
        &["FIELD", "REQUIREMENT", "TYPE", "DEFAULT"],
        rows.into_iter()
            .map(|(key, requirement, check, default)| {
                vec![key.to_string(), requirement.to_string(), check, default]
            })
            .collect(),
    );
    if descriptor.allow_extra {
        println!("\nAny other key is accepted.");
    }
    Ok(())
}

fn list(json: bool) -> anyhow::Result<()> {
    if json {
        let kinds: Vec<Value> = SchemaKind::all()
            .iter()
            .map(|k| json!({"schema": k.as_str(), "fields": k.descriptor().fields.len()}))
            .collect();
        return print_json(&kinds);
    }
    let rows = SchemaKind::all()
        .iter()
        .map(|k| vec![k.as_str().to_string(), k.descriptor().fields.len().to_string()])
        .collect();
    print_table(&["SCHEMA", "FIELDS"], rows);
    Ok(())
}

fn default_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
