use std::path::{Path, PathBuf};

use anyhow::bail;
use drydock_core::paths;

/// Resolve the service document to operate on.
///
/// Priority:
/// 1. `--service` flag / `DRYDOCK_SERVICE` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `service.json`
pub fn resolve_service(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }

    let cwd = std::env::current_dir()?;
    match paths::find_service_file(&cwd) {
        Some(found) => Ok(found),
        None => bail!(
            "no {} found in {} or any parent; pass --service",
            paths::SERVICE_FILE,
            cwd.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_service_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api.json");
        let result = resolve_service(Some(&path)).unwrap();
        assert_eq!(result, path);
    }
}
