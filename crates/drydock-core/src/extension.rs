//! `extends` chains.
//!
//! A document with an `extends` key is replaced by its parent with the
//! child's keys written over it. The parent may extend another document in
//! turn; the loader keeps calling [`ExtensionChain::step`] until the merged
//! document no longer extends anything. Every visited file is tracked by its
//! canonical path so a chain that comes back to a file fails instead of
//! recursing forever.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::document::{read_document, Document};
use crate::error::{DrydockError, Result};
use crate::paths;
use crate::schema::EXTENDS_KEY;

#[derive(Debug, Clone)]
pub struct ExtensionChain {
    visited: Vec<PathBuf>,
}

/// Result of one hop up the chain.
#[derive(Debug)]
pub struct Hop {
    pub document: Document,
    /// Directory that relative paths in the merged document resolve against.
    pub base: PathBuf,
}

impl ExtensionChain {
    /// Start a chain at the document loaded from `origin`.
    pub fn new(origin: &Path) -> Self {
        Self {
            visited: vec![paths::canonical(origin)],
        }
    }

    /// Files visited so far, starting with the origin.
    pub fn visited(&self) -> &[PathBuf] {
        &self.visited
    }

    /// Load the parent named by `doc.extends` (relative to `base`) and merge
    /// `doc` over it.
    pub fn step(&mut self, doc: &Document, base: &Path) -> Result<Hop> {
        let raw = doc
            .get(EXTENDS_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| DrydockError::Invalid(format!("`{EXTENDS_KEY}` must be a path string")))?;

        let parent_path = paths::expand_path(raw, base);
        let canonical = paths::canonical(&parent_path);
        if self.visited.contains(&canonical) {
            let mut chain = self.visited.clone();
            chain.push(canonical);
            return Err(DrydockError::CyclicExtension { chain });
        }

        let parent = read_document(&parent_path)?;
        debug!(parent = %canonical.display(), "resolved extension parent");
        self.visited.push(canonical);

        Ok(Hop {
            document: merge_over_parent(parent, doc),
            base: paths::document_dir(&parent_path),
        })
    }
}

/// `parent` with every key of `child` except `extends` written over it.
/// Keys keep the parent's order; keys new in the child are appended. A
/// parent that extends another file keeps its own `extends`.
pub fn merge_over_parent(parent: Document, child: &Document) -> Document {
    let mut merged = parent;
    for (key, value) in child {
        if key != EXTENDS_KEY {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
