//! CLI for cluster operations

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use minidfs::common::format_bytes;
use minidfs::coordinator::catalog::{ClusterStats, FileListing};
use minidfs::coordinator::metadata::NodeRecord;
use minidfs::ops::{RepairReport, VerifyReport};
use minidfs::recovery::{QueueEntry, QueueSummary, RecoveryHistoryEntry, SchedulerStats};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs cluster operations CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, global = true, default_value = "http://localhost:5000")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List storage nodes
    Nodes,

    /// List files
    Files {
        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Cluster statistics
    Stats,

    /// Show the recovery queue
    Queue,

    /// Show recent recovery attempts
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Recovery statistics
    RecoveryStats,

    /// Queue a file for recovery at top priority
    ForceRecovery {
        /// File ID
        file_id: String,
    },

    /// Run a reconciliation pass now
    Repair,

    /// Run a verification pass now
    Verify,
}

#[derive(Deserialize)]
struct NodeList {
    nodes: Vec<NodeRecord>,
}

#[derive(Deserialize)]
struct QueueReply {
    summary: QueueSummary,
    queue: Vec<QueueEntry>,
}

#[derive(Deserialize)]
struct HistoryReply {
    history: Vec<RecoveryHistoryEntry>,
}

#[derive(Deserialize)]
struct ReportReply<T> {
    report: T,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .with_context(|| format!("coordinator unreachable at {}", self.base))?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .send()
            .await
            .with_context(|| format!("coordinator unreachable at {}", self.base))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body["error"].as_str().unwrap_or("no error message");
        bail!("{}: {}", status, message);
    }
    Ok(response.json().await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = Client::new(&cli.coordinator);

    match cli.command {
        Commands::Nodes => {
            let reply: NodeList = client.get("/api/nodes").await?;
            println!("{:<16} {:<10} {:>12} {:>8}  ADDRESS", "NODE", "STATUS", "FREE", "FILES");
            for node in reply.nodes {
                println!(
                    "{:<16} {:<10} {:>12} {:>8}  {}",
                    node.node_id,
                    node.status,
                    format_bytes(node.available_bytes),
                    node.file_count,
                    node.address
                );
            }
        }

        Commands::Files { limit, offset } => {
            let listing: FileListing = client
                .get(&format!("/api/files?limit={}&offset={}", limit, offset))
                .await?;
            println!("{} file(s), showing {}", listing.total, listing.files.len());
            for file in listing.files {
                println!(
                    "  {}  {}  {}  {}/{} replicas",
                    file.file_id,
                    file.filename,
                    format_bytes(file.size),
                    file.active_replicas,
                    file.replication_factor
                );
            }
        }

        Commands::Stats => {
            let stats: ClusterStats = client.get("/api/stats").await?;
            println!("Cluster stats:");
            println!(
                "  Nodes: {} ({} active, {} inactive)",
                stats.total_nodes, stats.active_nodes, stats.inactive_nodes
            );
            println!(
                "  Files: {} ({})",
                stats.total_files,
                format_bytes(stats.total_size_bytes)
            );
            println!("  Under-replicated: {}", stats.under_replicated_files);
            println!("  Unavailable: {}", stats.unavailable_files);
            println!("  Recovery queue: {}", stats.recovery_queue_length);
        }

        Commands::Queue => {
            let reply: QueueReply = client.get("/api/recovery/queue").await?;
            let s = &reply.summary;
            println!(
                "Recovery queue: {} task(s), {} in flight (critical {}, high {}, medium {}, normal {}), {} parked",
                s.total, s.in_flight, s.critical, s.high, s.medium, s.normal, s.parked
            );
            for task in reply.queue {
                println!(
                    "  [{:>2}] {}  {}  attempts={}  eligible_at={}{}",
                    task.priority,
                    task.file_id,
                    task.strategy,
                    task.attempts,
                    task.eligible_at,
                    task.last_error
                        .map(|e| format!("  last_error={}", e))
                        .unwrap_or_default()
                );
            }
        }

        Commands::History { limit } => {
            let reply: HistoryReply = client
                .get(&format!("/api/recovery/history?limit={}", limit))
                .await?;
            for entry in reply.history {
                println!(
                    "{}  {}  {}  {}  {}ms  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    if entry.success { "OK  " } else { "FAIL" },
                    entry.file_id,
                    entry.strategy,
                    entry.elapsed_ms,
                    entry.error.unwrap_or_default()
                );
            }
        }

        Commands::RecoveryStats => {
            let stats: SchedulerStats = client.get("/api/recovery/stats").await?;
            let h = &stats.history;
            println!("Recovery stats:");
            println!("  Total: {}", h.total_recoveries);
            println!("  Successful: {}", h.successful_recoveries);
            println!("  Failed: {}", h.failed_recoveries);
            println!("  Success rate: {:.1}%", h.success_rate);
            println!("  Average time: {:.0}ms", h.average_recovery_ms);
            println!("  Critical recovered: {}", h.critical_recoveries);
            println!("  Bytes recovered: {}", format_bytes(h.bytes_recovered));
            println!("  Queue length: {}", stats.queue_length);
            println!("  Parked files: {}", stats.parked);
        }

        Commands::ForceRecovery { file_id } => {
            let _: serde_json::Value = client
                .post(&format!("/api/recovery/force/{}", file_id))
                .await?;
            println!("Recovery queued for {}", file_id);
        }

        Commands::Repair => {
            let reply: ReportReply<RepairReport> = client.post("/api/replication/force").await?;
            let report = reply.report;
            println!("Repair report:");
            println!("  Files checked: {}", report.files_checked);
            println!("  Files repaired: {}", report.files_repaired);
            println!("  Replicas created: {}", report.replicas_created);
            println!("  Bytes copied: {}", format_bytes(report.bytes_copied));
            println!("  Skipped (no target): {}", report.skipped_no_target);
            println!("  Escalated: {}", report.escalated);
            println!("  Verification failures: {}", report.verification_failures);
        }

        Commands::Verify => {
            let reply: ReportReply<VerifyReport> = client.post("/api/replication/verify").await?;
            let report = reply.report;
            println!("Verification report:");
            println!("  Replicas checked: {}", report.checked);
            println!("  Verified: {}", report.verified);
            println!("  Corrupted: {}", report.corrupted);
            println!("  Missing: {}", report.missing);
            println!("  Unreachable: {}", report.unreachable);
        }
    }

    Ok(())
}
