//! Coordinator
//!
//! The coordinator is responsible for:
//! - Metadata management (files, nodes, replica locations)
//! - Node liveness from heartbeats
//! - Placement of uploads and new replicas
//! - Moving verified copies between storage nodes
//! - The HTTP API for nodes, clients and operators

pub mod catalog;
pub mod events;
pub mod health;
pub mod http;
pub mod metadata;
pub mod node_client;
pub mod placement;
pub mod server;
pub mod transfer;

pub use server::Coordinator;
