//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::{
    Config, CoordinatorConfig, HealthConfig, RecoveryConfig, ReplicationConfig,
};
pub use error::{Error, Result};
pub use hash::{digests_match, is_valid_digest, sha256_hex, ChecksumHasher};
pub use utils::{format_bytes, timestamp_now, timestamp_now_millis, NodeStatus, ReplicaStatus};
