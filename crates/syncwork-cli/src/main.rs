mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use syncwork_types::output::ConnectorOperation;
use syncwork_types::workload::{WorkloadPriority, WorkloadStatus, WorkloadType};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "syncwork",
    version,
    about = "Workload dispatch and lifecycle tracking for sync jobs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to the service config YAML
    #[arg(long, default_value = "syncwork.yaml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a workload
    Dispatch {
        /// Workload id
        #[arg(long)]
        id: String,
        /// check, discover, spec or sync
        #[arg(long = "type", value_parser = parse_type)]
        workload_type: WorkloadType,
        /// JSON input payload
        #[arg(long)]
        input: String,
        /// Log location handed to the execution unit
        #[arg(long)]
        log_path: String,
        /// Idempotency token (random when omitted)
        #[arg(long)]
        auto_id: Option<Uuid>,
        /// Dispatch with high priority
        #[arg(long)]
        high_priority: bool,
        #[arg(long)]
        mutex_key: Option<String>,
        /// Label as key=value; repeatable
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
        /// JSON naming the workflow to signal on termination
        #[arg(long)]
        signal_input: Option<String>,
        #[arg(long)]
        organization_id: Option<Uuid>,
        #[arg(long)]
        workspace_id: Option<Uuid>,
        #[arg(long)]
        connection_id: Option<Uuid>,
    },
    /// Claim a pending workload for a dataplane
    Claim {
        id: String,
        #[arg(long)]
        dataplane_id: String,
    },
    /// Move a workload to a new status
    Status {
        id: String,
        /// launched, running, success, failure or cancelled
        #[arg(value_parser = parse_status)]
        status: WorkloadStatus,
    },
    /// Record a heartbeat and extend the deadline
    Heartbeat { id: String },
    /// Print a workload as JSON
    Get { id: String },
    /// List the oldest pending workloads of a queue
    ListPending {
        /// Dataplane group; all groups when omitted
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        high_priority: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Mark a workload failed
    Fail {
        id: String,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Fetch and hydrate a workload's input, as an execution unit would
    WorkerInit { id: String },
    /// Print the job output a workload left in storage
    Output { id: String },
    /// Print the retry schedule of the configured policy
    Backoff {
        #[arg(long, default_value_t = 12)]
        attempts: u32,
    },
    /// Print the pod name for a job attempt
    PodName {
        #[arg(long)]
        job_id: i64,
        #[arg(long)]
        attempt_id: i64,
        /// Connector image; replication pod when omitted
        #[arg(long, requires = "operation")]
        image: Option<String>,
        /// check, discover or spec
        #[arg(long, value_parser = parse_operation)]
        operation: Option<ConnectorOperation>,
        /// Also report whether the pod left its completion marker
        #[arg(long)]
        check_completed: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run(cli));
    // Signal deliveries past their timeout were already reported as failed.
    runtime.shutdown_background();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Dispatch {
            id,
            workload_type,
            input,
            log_path,
            auto_id,
            high_priority,
            mutex_key,
            labels,
            signal_input,
            organization_id,
            workspace_id,
            connection_id,
        } => {
            let priority = if high_priority {
                WorkloadPriority::High
            } else {
                WorkloadPriority::Default
            };
            let request = commands::dispatch::DispatchArgs {
                id,
                workload_type,
                input,
                log_path,
                auto_id: auto_id.unwrap_or_else(Uuid::new_v4),
                priority,
                mutex_key,
                labels: labels.into_iter().collect(),
                signal_input,
                organization_id,
                workspace_id,
                connection_id,
            };
            commands::dispatch::execute(&cli.config, request).await
        }
        Commands::Claim { id, dataplane_id } => {
            commands::workload::claim(&cli.config, &id, &dataplane_id)
        }
        Commands::Status { id, status } => {
            commands::workload::set_status(&cli.config, &id, status).await
        }
        Commands::Heartbeat { id } => commands::workload::heartbeat(&cli.config, &id),
        Commands::Get { id } => commands::workload::get(&cli.config, &id),
        Commands::ListPending {
            group,
            high_priority,
            limit,
        } => {
            let priority = high_priority.then_some(WorkloadPriority::High);
            commands::workload::list_pending(&cli.config, group.as_deref(), priority, limit)
        }
        Commands::Fail { id, source, reason } => {
            commands::workload::fail(&cli.config, &id, source.as_deref(), reason.as_deref())
                .await
        }
        Commands::WorkerInit { id } => commands::worker::execute(&cli.config, &id).await,
        Commands::Output { id } => commands::output::execute(&cli.config, &id),
        Commands::Backoff { attempts } => commands::backoff::execute(&cli.config, attempts),
        Commands::PodName {
            job_id,
            attempt_id,
            image,
            operation,
            check_completed,
        } => {
            let name = commands::pod_name::render(image.as_deref(), operation, job_id, attempt_id);
            if check_completed {
                let state = if commands::pod_name::completed(&cli.config, &name)? {
                    "completed"
                } else {
                    "pending"
                };
                println!("{name} {state}");
            } else {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn parse_type(raw: &str) -> Result<WorkloadType, String> {
    WorkloadType::parse(raw).ok_or_else(|| format!("unknown workload type '{raw}'"))
}

fn parse_status(raw: &str) -> Result<WorkloadStatus, String> {
    WorkloadStatus::parse(raw).ok_or_else(|| format!("unknown status '{raw}'"))
}

fn parse_operation(raw: &str) -> Result<ConnectorOperation, String> {
    match raw {
        "check" => Ok(ConnectorOperation::Check),
        "discover" => Ok(ConnectorOperation::Discover),
        "spec" => Ok(ConnectorOperation::Spec),
        other => Err(format!("unknown connector operation '{other}'")),
    }
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("label '{raw}' is not key=value"))
}
