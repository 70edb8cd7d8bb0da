use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use syncwork_engine::{DispatchClient, LauncherInputMessage};
use syncwork_types::workload::{WorkloadPriority, WorkloadType};
use uuid::Uuid;

use super::context;

/// Flags of the `dispatch` subcommand.
pub struct DispatchArgs {
    pub id: String,
    pub workload_type: WorkloadType,
    pub input: String,
    pub log_path: String,
    pub auto_id: Uuid,
    pub priority: WorkloadPriority,
    pub mutex_key: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub signal_input: Option<String>,
    pub organization_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
}

/// Execute the `dispatch` command: enqueue one workload and print its id.
///
/// Workloads superseded by the new one are signalled before this returns.
pub async fn execute(config_path: &Path, args: DispatchArgs) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(&args.input)
        .context("--input must be a JSON document")?;

    let ctx = context::build(config_path)?;
    let message = LauncherInputMessage::builder()
        .workload_id(args.id)
        .workload_input(args.input)
        .labels(args.labels)
        .log_path(args.log_path)
        .workload_type(args.workload_type)
        .auto_id(args.auto_id)
        .priority(args.priority)
        .mutex_key(args.mutex_key)
        .start_time_ms(Some(chrono::Utc::now().timestamp_millis()))
        .signal_input(args.signal_input)
        .organization_id(args.organization_id)
        .workspace_id(args.workspace_id)
        .connection_id(args.connection_id)
        .build()?;

    let client = DispatchClient::new(Arc::clone(&ctx.handler), ctx.resolver.clone());
    let dispatched = client.dispatch(message);
    ctx.flush_signals().await;
    println!("{}", dispatched?);
    Ok(())
}
