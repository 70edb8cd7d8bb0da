use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use syncwork_engine::hydrate::EnvVarHydrator;
use syncwork_engine::input_fetcher::{InputFetcher, WorkloadApiClient};
use syncwork_types::workload::WorkloadId;

use super::context;

const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Execute the `worker-init` command: print the hydrated input of `id`.
///
/// Every failure, including the init timeout, has already marked the
/// workload failed by the time this returns an error.
pub async fn execute(config_path: &Path, id: &str) -> Result<()> {
    let ctx = context::build(config_path)?;
    let api: Arc<dyn WorkloadApiClient> = ctx.handler.clone();
    let fetcher = Arc::new(InputFetcher::new(api, Arc::new(EnvVarHydrator::new())));

    let id = WorkloadId::new(id);
    let fetched = fetcher.fetch_within(&id, INIT_TIMEOUT).await;
    ctx.flush_signals().await;
    let input = fetched?;
    println!("{}", serde_json::to_string_pretty(&input)?);
    tracing::info!(workload_id = %id, "Worker input written to stdout");
    Ok(())
}
