//! # minidfs
//!
//! Coordinator for a replicated file store:
//! - Heartbeat-driven node health monitoring
//! - Periodic reconciliation of under-replicated files
//! - Checksum verification of stored replicas
//! - Priority-driven recovery with exponential backoff
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Coordinator                  │
//! │  health monitor ─┐                           │
//! │  reconciler ─────┼─ events ─► recovery       │
//! │  verifier ───────┘            scheduler      │
//! │          metadata store (RocksDB)            │
//! └───────────┬──────────────────────────────────┘
//!             │ HTTP (fetch / store / verify)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼─────────┐   ┌──────▼─────┐   ┌────▼───────┐
//! │  Node 1   │   │  Node 2    │   │  Node 3    │
//! └───────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minidfs-coord serve \
//!   --bind 0.0.0.0:5000 \
//!   --db ./coord-data
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minidfs nodes --coordinator http://localhost:5000
//! minidfs queue
//! minidfs force-recovery <file-id>
//! minidfs repair
//! minidfs verify
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod ops;
pub mod recovery;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use recovery::RecoveryScheduler;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
