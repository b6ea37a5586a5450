use std::path::Path;

use anyhow::Context;
use clap::ValueEnum;
use drydock_core::loader::{self, LoadOptions};
use drydock_core::reflect::ReflectMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

pub fn run(service: &Path, strict: bool, format: Format, output: Option<&Path>) -> anyhow::Result<()> {
    let options = LoadOptions {
        mode: if strict {
            ReflectMode::Strict
        } else {
            ReflectMode::Simple
        },
        die: true,
    };
    let config = loader::load(service, options)
        .with_context(|| format!("failed to load {}", service.display()))?;

    let mut text = match format {
        Format::Json => serde_json::to_string_pretty(config.document())?,
        Format::Yaml => serde_yaml::to_string(config.document())?,
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }

    match output {
        Some(path) => {
            drydock_core::io::atomic_write(path, text.as_bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} ({})", path.display(), config.schema().kind);
        }
        None => print!("{text}"),
    }
    Ok(())
}
