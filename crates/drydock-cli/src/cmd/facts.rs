use std::path::Path;

use anyhow::Context;
use drydock_core::loader::{self, LoadOptions};

use crate::output::{print_json, print_table};

pub fn run(service: &Path, json: bool) -> anyhow::Result<()> {
    let config = loader::load(service, LoadOptions::default())
        .with_context(|| format!("failed to load {}", service.display()))?;
    let facts = config.facts(None);

    if json {
        return print_json(&facts);
    }
    let rows = facts.into_iter().map(|(k, v)| vec![k, v]).collect();
    print_table(&["FACT", "VALUE"], rows);
    Ok(())
}
