pub mod cache;
pub mod checks;
pub mod cloud;
pub mod config;
pub mod defaults;
pub mod document;
pub mod error;
pub mod extension;
pub mod io;
pub mod jsonc;
pub mod lifecycle;
pub mod loader;
pub mod paths;
pub mod platform;
pub mod probe;
pub mod provisioner;
pub mod reflect;
pub mod remote;
pub mod schema;
pub mod service;
pub mod shell;
pub mod validators;
pub mod vm;

#[cfg(test)]
mod fakes;

pub use error::{DrydockError, Result};
