//! Configuration for minidfs components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load `minidfs.toml` from the working directory (if present) and
    /// apply `MINIDFS_*` environment overrides, e.g. `MINIDFS_RECOVERY__MAX_ATTEMPTS=5`.
    pub fn load() -> Result<Self> {
        Self::load_from("minidfs")
    }

    /// Load from an explicit file (extension optional), then the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let config: Config = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("MINIDFS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the periodic units.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("health.sweep_interval_secs", self.health.sweep_interval_secs),
            (
                "health.heartbeat_timeout_secs",
                self.health.heartbeat_timeout_secs,
            ),
            (
                "replication.reconcile_interval_secs",
                self.replication.reconcile_interval_secs,
            ),
            (
                "replication.verify_interval_secs",
                self.replication.verify_interval_secs,
            ),
            (
                "recovery.fast_path_interval_secs",
                self.recovery.fast_path_interval_secs,
            ),
            (
                "recovery.main_interval_secs",
                self.recovery.main_interval_secs,
            ),
            (
                "recovery.safety_sweep_interval_secs",
                self.recovery.safety_sweep_interval_secs,
            ),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
        }
        if self.coordinator.default_replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "coordinator.default_replication_factor must be > 0".into(),
            ));
        }
        if self.recovery.max_concurrent_recoveries == 0 {
            return Err(Error::InvalidConfig(
                "recovery.max_concurrent_recoveries must be > 0".into(),
            ));
        }
        if self.recovery.base_delay_secs > self.recovery.max_delay_secs {
            return Err(Error::InvalidConfig(format!(
                "recovery.base_delay_secs ({}) exceeds recovery.max_delay_secs ({})",
                self.recovery.base_delay_secs, self.recovery.max_delay_secs
            )));
        }
        Ok(())
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// RocksDB path for metadata (in-memory when unset)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Replication factor for uploads that do not ask for one
    #[serde(default = "default_replication_factor")]
    pub default_replication_factor: usize,

    /// Timeout for a single fetch or store against a storage node
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}
fn default_replication_factor() -> usize {
    2
}
fn default_transfer_timeout() -> u64 {
    60
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: None,
            default_replication_factor: default_replication_factor(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How often stale heartbeats are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Silence after which an active node is declared lost
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
}

fn default_sweep_interval() -> u64 {
    10
}
fn default_heartbeat_timeout() -> u64 {
    30
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
        }
    }
}

impl HealthConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Replication reconciler and verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_verify_interval")]
    pub verify_interval_secs: u64,
}

fn default_reconcile_interval() -> u64 {
    30
}
fn default_verify_interval() -> u64 {
    300
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            verify_interval_secs: default_verify_interval(),
        }
    }
}

impl ReplicationConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }
}

/// Recovery scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Loop that dispatches HIGH and CRITICAL tasks ahead of the main loop
    #[serde(default = "default_fast_path_interval")]
    pub fast_path_interval_secs: u64,

    #[serde(default = "default_main_interval")]
    pub main_interval_secs: u64,

    /// Full re-prioritisation of every file
    #[serde(default = "default_safety_sweep_interval")]
    pub safety_sweep_interval_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_recoveries: usize,

    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Attempts before a task is parked as failed; unset retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_fast_path_interval() -> u64 {
    10
}
fn default_main_interval() -> u64 {
    45
}
fn default_safety_sweep_interval() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    3
}
fn default_base_delay() -> u64 {
    300
}
fn default_max_delay() -> u64 {
    3600
}
fn default_history_limit() -> usize {
    100
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            fast_path_interval_secs: default_fast_path_interval(),
            main_interval_secs: default_main_interval(),
            safety_sweep_interval_secs: default_safety_sweep_interval(),
            max_concurrent_recoveries: default_max_concurrent(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            max_attempts: None,
            history_limit: default_history_limit(),
        }
    }
}
