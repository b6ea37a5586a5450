//! Field-level predicates used by the schema registry.
//!
//! Each check is pure apart from [`file_path_exists`], which looks at the
//! filesystem. Failures are [`DrydockError::Invalid`] naming the key and,
//! for list checks, the offending index.

use std::path::Path;

use serde_json::Value;

use crate::document::type_name;
use crate::error::{DrydockError, Result};
use crate::paths;

fn invalid(message: String) -> DrydockError {
    DrydockError::Invalid(message)
}

pub fn string(key: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(_) => Ok(()),
        other => Err(invalid(format!(
            "expected string for key `{key}`, found type {}",
            type_name(other)
        ))),
    }
}

/// Exactly `true` or `false`. Strings like `"yes"` are rejected.
pub fn boolean(key: &str, value: &Value) -> Result<()> {
    match value {
        Value::Bool(_) => Ok(()),
        other => Err(invalid(format!(
            "expected boolean for key `{key}`, found type {}",
            type_name(other)
        ))),
    }
}

pub fn dict(key: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(_) => Ok(()),
        other => Err(invalid(format!(
            "expected dict for key `{key}`, found type {}",
            type_name(other)
        ))),
    }
}

/// A TCP port given either as an integer or as a string of digits.
pub fn port_like(key: &str, value: &Value) -> Result<()> {
    let port = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match port {
        Some(p) if (1..=65535).contains(&p) => Ok(()),
        _ => Err(invalid(format!(
            "expected a port number (1-65535) for key `{key}`, found {}",
            value
        ))),
    }
}

pub fn list_of_strings(key: &str, value: &Value) -> Result<()> {
    let items = expect_list(key, value)?;
    for (index, item) in items.iter().enumerate() {
        if !item.is_string() {
            return Err(invalid(format!(
                "expected string for key `{key}`, index {index} is type {}",
                type_name(item)
            )));
        }
    }
    Ok(())
}

pub fn list_of_dicts(key: &str, value: &Value) -> Result<()> {
    let items = expect_list(key, value)?;
    for (index, item) in items.iter().enumerate() {
        if !item.is_object() {
            return Err(invalid(format!(
                "expected dict for key `{key}`, index {index} is type {}",
                type_name(item)
            )));
        }
    }
    Ok(())
}

/// A mapping that carries at least `required` keys.
pub fn nested_object_has_keys(key: &str, value: &Value, required: &[&str]) -> Result<()> {
    let Value::Object(map) = value else {
        return Err(invalid(format!(
            "expected dict for key `{key}`, found type {}",
            type_name(value)
        )));
    };
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| !map.contains_key(*k))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(invalid(format!(
            "key `{key}` is missing required sub-keys: {}",
            missing.join(", ")
        )))
    }
}

/// A path to an existing regular file. `~` is expanded and relative paths
/// resolve against `base`. Values that still hold template placeholders are
/// accepted here; the semantic pass checks them after reflection.
pub fn file_path_exists(key: &str, value: &Value, base: &Path) -> Result<()> {
    string(key, value)?;
    let raw = value.as_str().unwrap_or_default();
    if raw.contains("{{") {
        return Ok(());
    }
    let path = paths::expand_path(raw, base);
    if !path.exists() {
        return Err(invalid(format!(
            "file for key `{key}` does not exist: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(invalid(format!(
            "path for key `{key}` is not a regular file: {}",
            path.display()
        )));
    }
    Ok(())
}

pub fn enum_equals(key: &str, value: &Value, allowed: &str) -> Result<()> {
    match value.as_str() {
        Some(s) if s == allowed => Ok(()),
        _ => Err(invalid(format!(
            "key `{key}` must equal \"{allowed}\", found {value}"
        ))),
    }
}

pub fn one_of(key: &str, value: &Value, allowed: &[&str]) -> Result<()> {
    match value.as_str() {
        Some(s) if allowed.contains(&s) => Ok(()),
        _ => Err(invalid(format!(
            "key `{key}` must be one of {}, found {value}",
            allowed.join(", ")
        ))),
    }
}

fn expect_list<'a>(key: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| {
        invalid(format!(
            "expected list for key `{key}`, found type {}",
            type_name(value)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn list_of_strings_reports_index_and_type() {
        let err = list_of_strings("setup_list", &json!(["a", "b", 3])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value: expected string for key `setup_list`, index 2 is type <int>"
        );
    }

    #[test]
    fn security_group_list_shapes() {
        assert!(list_of_dicts("security_groups", &json!("web")).is_err());
        assert!(list_of_dicts("security_groups", &json!([{}, "web"])).is_err());
        assert!(list_of_dicts("security_groups", &json!([{}])).is_ok());
        assert!(list_of_dicts("security_groups", &json!([])).is_ok());
    }

    #[test]
    fn booleans_must_be_real_booleans() {
        assert!(boolean("detailed_monitoring", &json!(true)).is_ok());
        assert!(boolean("detailed_monitoring", &json!("true")).is_err());
        assert!(boolean("detailed_monitoring", &json!(1)).is_err());
    }

    #[test]
    fn port_accepts_number_or_digit_string() {
        assert!(port_like("port", &json!(22)).is_ok());
        assert!(port_like("port", &json!("2222")).is_ok());
        assert!(port_like("port", &json!("ssh")).is_err());
        assert!(port_like("port", &json!(70000)).is_err());
        assert!(port_like("port", &json!(0)).is_err());
    }

    #[test]
    fn nested_object_lists_missing_keys() {
        let err = nested_object_has_keys("vm", &json!({"box": "ubuntu"}), &["box", "ip", "memory"])
            .unwrap_err();
        assert!(err.to_string().contains("ip, memory"));
        assert!(nested_object_has_keys("vm", &json!([]), &["box"]).is_err());
    }

    #[test]
    fn file_path_checks_existence_and_kind() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("site.pp"), "node default {}").unwrap();
        assert!(file_path_exists("manifest", &json!("site.pp"), dir.path()).is_ok());
        let missing = file_path_exists("manifest", &json!("other.pp"), dir.path()).unwrap_err();
        assert!(missing.to_string().contains("does not exist"));
        let not_file = file_path_exists("manifest", &json!("."), dir.path()).unwrap_err();
        assert!(not_file.to_string().contains("not a regular file"));
    }

    #[test]
    fn file_path_defers_templated_values() {
        let dir = TempDir::new().unwrap();
        assert!(file_path_exists("manifest", &json!("{{name}}.pp"), dir.path()).is_ok());
    }

    #[test]
    fn enum_and_one_of() {
        assert!(enum_equals("instance_type", &json!("vagrant"), "vagrant").is_ok());
        assert!(enum_equals("instance_type", &json!("t3.micro"), "vagrant").is_err());
        assert!(one_of("instance_type", &json!("paas"), &["heroku", "paas"]).is_ok());
        assert!(one_of("instance_type", &json!(5), &["heroku"]).is_err());
    }
}
