use std::path::Path;

use anyhow::{Context, Result};
use syncwork_engine::config;

/// Execute the `backoff` command: print the delay before each attempt.
pub fn execute(config_path: &Path, attempts: u32) -> Result<()> {
    let config = config::load(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let policy = config.retry.policy();

    for attempt in 0..attempts {
        println!("attempt {attempt:>3}: {}s", policy.get_backoff(attempt).as_secs());
    }
    Ok(())
}
