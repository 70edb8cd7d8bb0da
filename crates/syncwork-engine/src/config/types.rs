use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use syncwork_types::workload::MutexPolicy;
use uuid::Uuid;

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// `SQLite` database holding workloads and stream tracking.
    pub database: PathBuf,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub dataplane: DataplaneConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./syncwork-storage")
}

fn default_namespace() -> String {
    "jobs".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_base_delay_secs() -> u64 {
    10
}

fn default_max_delay_secs() -> u64 {
    3600
}

fn default_multiplier() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.base_delay_secs),
            Duration::from_secs(self.max_delay_secs),
            self.multiplier,
        )
    }
}

/// How workflow signals leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    #[default]
    InProcess,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default)]
    pub mode: SignalMode,
    #[serde(default = "default_signal_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_signal_timeout_ms() -> u64 {
    5_000
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            mode: SignalMode::default(),
            timeout_ms: default_signal_timeout_ms(),
        }
    }
}

impl SignalConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mutex_policy: MutexPolicy,
    /// How long a claimed workload may go without a heartbeat.
    #[serde(default = "default_claim_deadline_secs")]
    pub claim_deadline_secs: u64,
}

fn default_claim_deadline_secs() -> u64 {
    600
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mutex_policy: MutexPolicy::default(),
            claim_deadline_secs: default_claim_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataplaneConfig {
    /// Workspace id → dataplane group.
    #[serde(default)]
    pub workspaces: BTreeMap<Uuid, String>,
}
