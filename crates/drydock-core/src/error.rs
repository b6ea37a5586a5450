use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrydockError {
    #[error("service document not found: {}", .0.display())]
    DocumentNotFound(PathBuf),

    #[error("malformed service document {}: {message}", path.display())]
    MalformedDocument { path: PathBuf, message: String },

    #[error("document does not match the {schema} schema:\n{}", format_errors(errors))]
    SchemaInvalid { schema: String, errors: Vec<String> },

    #[error("invalid value: {0}")]
    Invalid(String),

    #[error("undefined template variable '{variable}' (simple mode: {simple}): {message}")]
    Reflection {
        variable: String,
        message: String,
        simple: bool,
    },

    #[error("template syntax error: {0}")]
    TemplateSyntax(String),

    #[error("cyclic extension: {}", format_chain(chain))]
    CyclicExtension { chain: Vec<PathBuf> },

    #[error("no running instance found for service '{0}'")]
    InstanceNotFound(String),

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("required tool '{0}' was not found on PATH")]
    ToolMissing(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl DrydockError {
    /// Errors worth retrying while a freshly created host is still booting.
    pub fn is_transient(&self) -> bool {
        matches!(self, DrydockError::Unreachable(_))
    }
}

fn format_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, DrydockError>;
