use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File name constants
// ---------------------------------------------------------------------------

pub const SERVICE_FILE: &str = "service.json";
pub const DRYDOCK_DIR: &str = ".drydock";
pub const SETTINGS_FILE: &str = "settings.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `~/.drydock/settings.json`, or `None` when no home directory is known.
pub fn default_settings_path() -> Option<PathBuf> {
    home::home_dir().map(|h| h.join(DRYDOCK_DIR).join(SETTINGS_FILE))
}

/// Expand a leading `~` and anchor relative paths at `base`.
pub fn expand_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = expand_home(raw);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// Expand a leading `~` or `~/` to the home directory. Other paths are
/// returned unchanged.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = home::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Directory that relative references inside a document resolve against.
pub fn document_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Absolute, symlink-free form of `path` when it exists, else a lexical
/// absolute form. Used as the identity of a document in extension chains.
pub fn canonical(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Walk upward from `start` looking for a `service.json`.
pub fn find_service_file(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(SERVICE_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => return None,
        }
    }
}
