use std::path::Path;

use anyhow::{bail, Result};
use syncwork_types::workload::{WorkloadId, WorkloadType};

use super::context;

/// Execute the `output` command: print the job output a workload's execution
/// unit left in storage.
pub fn execute(config_path: &Path, id: &str) -> Result<()> {
    let ctx = context::build(config_path)?;
    let id = WorkloadId::new(id);
    let workload = ctx.handler.get(&id)?;
    let docs = context::doc_store(&ctx.config);

    let rendered = match workload.workload_type {
        WorkloadType::Sync => docs
            .read_sync_output(&id)?
            .map(|output| serde_json::to_string_pretty(&output))
            .transpose()?,
        _ => docs
            .read_connector_output(&id)?
            .map(|output| serde_json::to_string_pretty(&output))
            .transpose()?,
    };

    match rendered {
        Some(json) => {
            println!("{json}");
            Ok(())
        }
        None => bail!("no output recorded for workload {id}"),
    }
}
