//! Raw service documents: decoding and small value helpers.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{DrydockError, Result};
use crate::jsonc;

/// An untyped service document. Insertion order follows the source text.
pub type Document = Map<String, Value>;

/// Read and decode the document at `path`.
///
/// The top level must be a mapping. Comments and trailing commas are
/// accepted.
pub fn read_document(path: &Path) -> Result<Document> {
    if !path.is_file() {
        return Err(DrydockError::DocumentNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = text.len(), "reading service document");
    parse_document(&text).map_err(|message| DrydockError::MalformedDocument {
        path: path.to_path_buf(),
        message,
    })
}

/// Decode document text. Errors are returned as plain messages so callers
/// can attach the source path.
pub fn parse_document(text: &str) -> std::result::Result<Document, String> {
    let value: Value = serde_json::from_str(&jsonc::strip(text)).map_err(|e| e.to_string())?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "top level must be a mapping, found {}",
            type_name(&other)
        )),
    }
}

/// Short type label used in validation messages, e.g. `<int>`.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "<null>",
        Value::Bool(_) => "<bool>",
        Value::Number(n) if n.is_f64() => "<float>",
        Value::Number(_) => "<int>",
        Value::String(_) => "<string>",
        Value::Array(_) => "<list>",
        Value::Object(_) => "<dict>",
    }
}

/// Render a scalar the way it appears in shell commands and facts.
/// Lists and mappings become compact JSON.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_document_not_found() {
        let dir = TempDir::new().unwrap();
        let err = read_document(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, DrydockError::DocumentNotFound(_)));
    }

    #[test]
    fn malformed_json_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"name\": ").unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(matches!(err, DrydockError::MalformedDocument { .. }));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn top_level_list_is_rejected() {
        let err = parse_document("[1, 2]").unwrap_err();
        assert!(err.contains("<list>"));
    }

    #[test]
    fn preserves_key_order() {
        let doc = parse_document(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let keys: Vec<&str> = doc.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn type_names() {
        assert_eq!(type_name(&json!(1)), "<int>");
        assert_eq!(type_name(&json!(1.5)), "<float>");
        assert_eq!(type_name(&json!({})), "<dict>");
        assert_eq!(scalar_text(&json!(null)), "");
        assert_eq!(scalar_text(&json!(22)), "22");
    }
}
