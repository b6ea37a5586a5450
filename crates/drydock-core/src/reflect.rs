//! Template reflection: a document rendered against its own values.
//!
//! Every string in a document is a template. Placeholders look like
//! `{{ name }}`, `{{ tags.role }}` or `{{ name | upper }}` and resolve against
//! the *template context*: the document itself with the entries of its
//! `service_defaults` block laid over the top level.
//!
//! Keys are reflected one at a time in document order, and each reflected
//! value replaces the raw one in the context before the next key is visited.
//! A key can therefore see the already-rendered value of any key before it,
//! but only the raw value of keys after it. This is a single left-to-right
//! pass; substituted text is not rendered again.
//!
//! Undefined names are errors, with one carve-out: in [`ReflectMode::Simple`]
//! the deployment-time names in [`LAZY_VARIABLES`] are left as literal
//! placeholders so they can be rendered once a host exists.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::{scalar_text, Document};
use crate::error::{DrydockError, Result};
use crate::schema::SERVICE_DEFAULTS_KEY;

/// Names that are only known once a deployment exists. This set is fixed.
pub const LAZY_VARIABLES: &[&str] = &["host", "username", "pem"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectMode {
    /// Every undefined name is an error.
    Strict,
    /// Undefined lazy names are deferred; everything else is strict.
    Simple,
}

impl ReflectMode {
    pub fn is_simple(&self) -> bool {
        matches!(self, ReflectMode::Simple)
    }
}

pub fn is_lazy(name: &str) -> bool {
    LAZY_VARIABLES.contains(&name)
}

// ---------------------------------------------------------------------------
// Document reflection
// ---------------------------------------------------------------------------

/// Reflect every value of `doc` against the document's own namespace.
///
/// The result has exactly the keys of `doc`. Entries of `service_defaults`
/// act as substitution sources but are not lifted to the top level; the
/// `service_defaults` block itself is rendered a second time against the
/// finished context so its entries may refer to any top-level field.
pub fn reflect(doc: &Document, mode: ReflectMode) -> Result<Document> {
    let mut context = build_context(doc);
    let mut out = Document::new();

    for (key, value) in doc {
        let reflected = reflect_value(value, &context, mode)?;
        context.insert(key.clone(), reflected.clone());
        out.insert(key.clone(), reflected);
    }

    if let Some(Value::Object(defaults)) = out.get(SERVICE_DEFAULTS_KEY).cloned() {
        let mut rendered = Map::new();
        for (key, value) in defaults {
            rendered.insert(key, reflect_value(&value, &context, mode)?);
        }
        out.insert(SERVICE_DEFAULTS_KEY.to_string(), Value::Object(rendered));
    }

    Ok(out)
}

/// The document with its `service_defaults` entries overlaid on top.
pub fn build_context(doc: &Document) -> Document {
    let mut context = doc.clone();
    if let Some(Value::Object(defaults)) = doc.get(SERVICE_DEFAULTS_KEY) {
        for (key, value) in defaults {
            context.insert(key.clone(), value.clone());
        }
    }
    context
}

/// Reflect a single value. Lists keep their order; mapping keys are
/// templates too.
pub fn reflect_value(value: &Value, context: &Document, mode: ReflectMode) -> Result<Value> {
    match value {
        Value::String(text) => Ok(Value::String(render(text, context, mode)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| reflect_value(item, context, mode))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                let key = render(key, context, mode)?;
                out.insert(key, reflect_value(child, context, mode)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

// ---------------------------------------------------------------------------
// String rendering
// ---------------------------------------------------------------------------

/// Render one template string against `context`.
pub fn render(template: &str, context: &Document, mode: ReflectMode) -> Result<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let mut rendered = String::with_capacity(template.len());
    let mut cursor = 0usize;

    for caps in placeholder_regex().captures_iter(template) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        rendered.push_str(&template[cursor..whole.start()]);
        cursor = whole.end();

        let expr = parse_expression(inner.as_str())?;
        match lookup(context, &expr.path) {
            Some(value) => rendered.push_str(&apply_filters(value, &expr.filters)?),
            None => {
                let root = expr.path[0].as_str();
                if mode.is_simple() && is_lazy(root) {
                    debug!(variable = root, "deferring lazy template variable");
                    rendered.push_str(whole.as_str());
                } else {
                    let variable = expr.path.join(".");
                    return Err(DrydockError::Reflection {
                        message: format!("'{variable}' is undefined in \"{template}\""),
                        variable,
                        simple: mode.is_simple(),
                    });
                }
            }
        }
    }

    rendered.push_str(&template[cursor..]);
    Ok(rendered)
}

/// Render strictly, once deployment-time facts are part of `context`.
pub fn render_runtime(template: &str, context: &Document) -> Result<String> {
    render(template, context, ReflectMode::Strict)
}

/// Root variable names referenced by `template`, in order of appearance.
/// Malformed placeholders are skipped.
pub fn referenced_names(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .filter_map(|caps| caps.get(1))
        .filter_map(|inner| parse_expression(inner.as_str()).ok())
        .map(|expr| expr.path[0].clone())
        .collect()
}

#[derive(Debug)]
struct Expression {
    path: Vec<String>,
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, Copy)]
enum Filter {
    Lower,
    Upper,
    Trim,
    Json,
}

fn parse_expression(inner: &str) -> Result<Expression> {
    let mut parts = inner.split('|');
    let path_src = parts.next().unwrap_or_default().trim();
    if !path_regex().is_match(path_src) {
        return Err(DrydockError::TemplateSyntax(format!(
            "invalid placeholder '{{{{{inner}}}}}'"
        )));
    }
    let path = path_src.split('.').map(str::to_string).collect();

    let filters = parts
        .map(|f| match f.trim() {
            "lower" => Ok(Filter::Lower),
            "upper" => Ok(Filter::Upper),
            "trim" => Ok(Filter::Trim),
            "json" => Ok(Filter::Json),
            other => Err(DrydockError::TemplateSyntax(format!(
                "unknown filter '{other}' in '{{{{{inner}}}}}'"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Expression { path, filters })
}

fn lookup<'a>(context: &'a Document, path: &[String]) -> Option<&'a Value> {
    let mut current = context.get(&path[0])?;
    for segment in &path[1..] {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn apply_filters(value: &Value, filters: &[Filter]) -> Result<String> {
    let mut text = scalar_text(value);
    for filter in filters {
        text = match filter {
            Filter::Lower => text.to_lowercase(),
            Filter::Upper => text.to_uppercase(),
            Filter::Trim => text.trim().to_string(),
            Filter::Json => serde_json::to_string(value)?,
        };
    }
    Ok(text)
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("valid placeholder regex"))
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*$").expect("valid path regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn self_reference_resolves() {
        let d = doc(json!({"name": "{{service_name}}", "service_name": "demo"}));
        let out = reflect(&d, ReflectMode::Simple).unwrap();
        assert_eq!(out["name"], json!("demo"));
    }

    #[test]
    fn lazy_variable_is_left_literal_in_simple_mode() {
        let d = doc(json!({
            "name": "x",
            "provision_list": ["local://echo {{name}}, {{host}}"]
        }));
        let out = reflect(&d, ReflectMode::Simple).unwrap();
        assert_eq!(out["provision_list"], json!(["local://echo x, {{host}}"]));
    }

    #[test]
    fn lazy_variable_is_an_error_in_strict_mode() {
        let d = doc(json!({
            "name": "x",
            "provision_list": ["local://echo {{name}}, {{host}}"]
        }));
        let err = reflect(&d, ReflectMode::Strict).unwrap_err();
        match err {
            DrydockError::Reflection {
                variable, simple, ..
            } => {
                assert_eq!(variable, "host");
                assert!(!simple);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_lazy_name_is_tolerated_only_in_simple_mode() {
        for name in LAZY_VARIABLES {
            let d = doc(json!({"cmd": format!("ssh {{{{{name}}}}}")}));
            let out = reflect(&d, ReflectMode::Simple).unwrap();
            assert_eq!(out["cmd"], json!(format!("ssh {{{{{name}}}}}")));
            assert!(reflect(&d, ReflectMode::Strict).is_err());
        }
    }

    #[test]
    fn unknown_variable_fails_even_in_simple_mode() {
        let d = doc(json!({
            "name": "x",
            "provision_list": ["local://{{bad_variable}} {{name}}"]
        }));
        let err = reflect(&d, ReflectMode::Simple).unwrap_err();
        match err {
            DrydockError::Reflection {
                variable, simple, ..
            } => {
                assert_eq!(variable, "bad_variable");
                assert!(simple);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn template_free_document_is_unchanged() {
        let d = doc(json!({
            "name": "api",
            "port": "22",
            "enabled": true,
            "weight": 1.5,
            "nothing": null,
            "setup_list": ["apt-get update", "echo done"],
            "tags": {"role": "web", "nested": {"a": [1, 2]}}
        }));
        let out = reflect(&d, ReflectMode::Strict).unwrap();
        assert_eq!(out, d);
    }

    #[test]
    fn later_keys_see_earlier_reflected_values() {
        let d = doc(json!({
            "a": "{{b}}",
            "b": "{{c}}",
            "c": "leaf",
            "d": "{{b}}"
        }));
        let out = reflect(&d, ReflectMode::Strict).unwrap();
        // `a` sees the raw `b`; single pass, no re-rendering.
        assert_eq!(out["a"], json!("{{c}}"));
        assert_eq!(out["b"], json!("leaf"));
        // `d` sees the reflected `b`.
        assert_eq!(out["d"], json!("leaf"));
    }

    #[test]
    fn service_defaults_are_sources_but_not_outputs() {
        let d = doc(json!({
            "name": "api",
            "db_url": "postgres://{{db_host}}/{{name}}",
            "service_defaults": {"db_host": "db.internal", "label": "{{name}}-svc"}
        }));
        let out = reflect(&d, ReflectMode::Strict).unwrap();
        assert_eq!(out["db_url"], json!("postgres://db.internal/api"));
        assert!(!out.contains_key("db_host"));
        assert!(!out.contains_key("label"));
        assert_eq!(
            out["service_defaults"],
            json!({"db_host": "db.internal", "label": "api-svc"})
        );
        let keys: Vec<&String> = out.keys().collect();
        assert_eq!(keys, ["name", "db_url", "service_defaults"]);
    }

    #[test]
    fn service_defaults_may_reference_later_top_level_fields() {
        let d = doc(json!({
            "service_defaults": {"greeting": "hello {{who}}"},
            "who": "world"
        }));
        let out = reflect(&d, ReflectMode::Strict).unwrap();
        assert_eq!(out["service_defaults"]["greeting"], json!("hello world"));
    }

    #[test]
    fn nested_structures_and_keys_are_reflected() {
        let d = doc(json!({
            "name": "api",
            "tags": {"{{name}}-role": "web-{{name}}"},
            "check_list": [{"type": "http", "url": "http://{{host}}/{{name}}"}]
        }));
        let out = reflect(&d, ReflectMode::Simple).unwrap();
        assert_eq!(out["tags"], json!({"api-role": "web-api"}));
        assert_eq!(out["check_list"][0]["url"], json!("http://{{host}}/api"));
    }

    #[test]
    fn dotted_paths_and_filters() {
        let context = doc(json!({
            "name": "Api",
            "tags": {"role": "web"},
            "ports": [80, 443],
            "enabled": true,
            "vm": {"ip": "10.0.0.2"}
        }));
        let render_strict = |t: &str| render(t, &context, ReflectMode::Strict).unwrap();
        assert_eq!(render_strict("{{ tags.role }}"), "web");
        assert_eq!(render_strict("{{ports.1}}"), "443");
        assert_eq!(render_strict("{{ name | lower }}"), "api");
        assert_eq!(render_strict("{{name|upper}}"), "API");
        assert_eq!(render_strict("{{enabled}}"), "true");
        assert_eq!(render_strict("{{ports|json}}"), "[80,443]");
        assert_eq!(render_strict("{{vm.ip}}:22"), "10.0.0.2:22");
    }

    #[test]
    fn missing_nested_segment_is_undefined() {
        let context = doc(json!({"tags": {"role": "web"}}));
        let err = render("{{tags.owner}}", &context, ReflectMode::Simple).unwrap_err();
        assert!(matches!(err, DrydockError::Reflection { ref variable, .. } if variable == "tags.owner"));
    }

    #[test]
    fn bad_placeholder_syntax_is_reported() {
        let context = Document::new();
        let err = render("{{ not valid! }}", &context, ReflectMode::Simple).unwrap_err();
        assert!(matches!(err, DrydockError::TemplateSyntax(_)));
        let err = render("{{ name | shout }}", &context, ReflectMode::Simple).unwrap_err();
        assert!(err.to_string().contains("unknown filter 'shout'"));
    }

    #[test]
    fn runtime_render_resolves_deferred_placeholders() {
        let d = doc(json!({"name": "x", "cmd": "ssh {{username}}@{{host}}"}));
        let mut resolved = reflect(&d, ReflectMode::Simple).unwrap();
        resolved.insert("host".into(), json!("10.1.2.3"));
        resolved.insert("username".into(), json!("ubuntu"));
        let cmd = render_runtime(resolved["cmd"].as_str().unwrap(), &resolved).unwrap();
        assert_eq!(cmd, "ssh ubuntu@10.1.2.3");
    }

    #[test]
    fn referenced_names_lists_roots() {
        assert_eq!(
            referenced_names("http://{{host}}:{{ port }}/{{tags.role|lower}}"),
            vec!["host", "port", "tags"]
        );
    }

    #[test]
    fn unclosed_braces_are_literal() {
        let context = Document::new();
        assert_eq!(
            render("echo {{ oops", &context, ReflectMode::Strict).unwrap(),
            "echo {{ oops"
        );
    }
}
