//! Service configuration: YAML types, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

use std::path::Path;

use anyhow::Result;

pub use types::ServiceConfig;

/// Parse and validate the config file at `path`.
///
/// # Errors
///
/// Returns an error if the file can't be read or parsed, or fails validation.
pub fn load(path: &Path) -> Result<ServiceConfig> {
    let config = parser::parse_config(path)?;
    validator::validate_config(&config)?;
    Ok(config)
}
