use std::path::Path;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use syncwork_engine::config::ServiceConfig;
use syncwork_engine::TransitionOutcome;
use syncwork_types::workload::{WorkloadId, WorkloadPriority, WorkloadStatus};

use super::context;

/// Termination source recorded for failures issued from the CLI.
const CLI_SOURCE: &str = "cli";

fn claim_deadline(config: &ServiceConfig) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(config.dispatch.claim_deadline_secs).ok()?;
    Utc::now().checked_add_signed(Duration::try_seconds(secs)?)
}

fn report(outcome: &TransitionOutcome) {
    let w = outcome.workload();
    let verb = if outcome.is_applied() {
        "now"
    } else {
        "already"
    };
    println!("{} {verb} {}", w.id, w.status);
}

pub fn claim(config_path: &Path, id: &str, dataplane_id: &str) -> Result<()> {
    let ctx = context::build(config_path)?;
    let deadline = claim_deadline(&ctx.config);
    let outcome = ctx
        .handler
        .claim(&WorkloadId::new(id), dataplane_id, deadline)?;
    report(&outcome);
    Ok(())
}

/// Execute the `status` command. Claims go through `claim`, which records the
/// dataplane.
pub async fn set_status(config_path: &Path, id: &str, status: WorkloadStatus) -> Result<()> {
    if status == WorkloadStatus::Claimed {
        bail!("use `syncwork claim` to claim a workload");
    }
    let ctx = context::build(config_path)?;
    let id = WorkloadId::new(id);
    let deadline = claim_deadline(&ctx.config);
    let outcome = match status {
        WorkloadStatus::Launched => ctx.handler.launched(&id, deadline),
        WorkloadStatus::Running => ctx.handler.running(&id, deadline),
        WorkloadStatus::Success => ctx.handler.succeed(&id),
        WorkloadStatus::Failure => ctx.handler.fail(&id, Some(CLI_SOURCE), None),
        WorkloadStatus::Cancelled => ctx.handler.cancel(&id, Some(CLI_SOURCE), None),
        other => ctx.handler.set_status(&id, other),
    };
    ctx.flush_signals().await;
    report(&outcome?);
    Ok(())
}

pub fn heartbeat(config_path: &Path, id: &str) -> Result<()> {
    let ctx = context::build(config_path)?;
    let deadline = claim_deadline(&ctx.config);
    let outcome = ctx.handler.heartbeat(&WorkloadId::new(id), deadline)?;
    if let Some(deadline) = outcome.workload().deadline {
        println!("{} deadline {}", outcome.workload().id, deadline.to_rfc3339());
    }
    Ok(())
}

pub fn get(config_path: &Path, id: &str) -> Result<()> {
    let ctx = context::build(config_path)?;
    let workload = ctx.handler.get(&WorkloadId::new(id))?;
    println!("{}", serde_json::to_string_pretty(&workload)?);
    Ok(())
}

pub fn list_pending(
    config_path: &Path,
    group: Option<&str>,
    priority: Option<WorkloadPriority>,
    limit: usize,
) -> Result<()> {
    let ctx = context::build(config_path)?;
    let pending = ctx.handler.poll_pending(group, priority, limit)?;
    let total = ctx.handler.count_pending(group, priority)?;
    for w in &pending {
        println!(
            "{:<36} {:<9} {:<8} {}",
            w.id.as_str(),
            w.workload_type.as_str(),
            w.priority.as_int(),
            if w.dataplane_group.is_empty() {
                "-"
            } else {
                w.dataplane_group.as_str()
            }
        );
    }
    println!("{} of {total} pending shown", pending.len());
    Ok(())
}

pub async fn fail(
    config_path: &Path,
    id: &str,
    source: Option<&str>,
    reason: Option<&str>,
) -> Result<()> {
    let ctx = context::build(config_path)?;
    let outcome = ctx.handler.fail(
        &WorkloadId::new(id),
        Some(source.unwrap_or(CLI_SOURCE)),
        reason,
    );
    ctx.flush_signals().await;
    report(&outcome?);
    Ok(())
}
