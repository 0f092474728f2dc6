//! HTTP API for the coordinator
//!
//! Storage nodes register and heartbeat here; clients ask where to upload and
//! download; operators inspect the cluster and trigger maintenance.

use crate::common::{timestamp_now, Error};
use crate::coordinator::catalog::{self, UploadConfirmation, UploadRequest};
use crate::coordinator::health::{HealthMonitor, Heartbeat, NodeRegistration};
use crate::coordinator::metadata::{MetadataStore, NodeRecord};
use crate::coordinator::node_client::NodeTransport;
use crate::ops::{Reconciler, Verifier};
use crate::recovery::RecoveryScheduler;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state behind every handler
#[derive(Clone)]
pub struct CoordState {
    pub store: Arc<MetadataStore>,
    pub transport: Arc<dyn NodeTransport>,
    pub monitor: Arc<HealthMonitor>,
    pub reconciler: Arc<Reconciler>,
    pub verifier: Arc<Verifier>,
    pub scheduler: Arc<RecoveryScheduler>,
    pub default_replication_factor: usize,
}

/// Error body: `{"error": "..."}` with the status from [`Error::to_http_status`]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        // Storage nodes
        .route("/api/nodes/register", axum::routing::post(register_node))
        .route("/api/nodes/heartbeat", axum::routing::post(heartbeat))
        .route("/api/nodes", axum::routing::get(list_nodes))
        .route("/api/nodes/:node_id/probe", axum::routing::post(probe_node))
        // Files
        .route("/api/upload/request", axum::routing::post(upload_request))
        .route("/api/upload/confirm", axum::routing::post(upload_confirm))
        .route("/api/download/:file_id", axum::routing::get(download))
        .route("/api/files", axum::routing::get(list_files))
        .route("/api/files/:file_id", axum::routing::get(get_file))
        .route("/api/stats", axum::routing::get(stats))
        // Maintenance
        .route("/api/replication/force", axum::routing::post(force_replication))
        .route("/api/replication/verify", axum::routing::post(force_verification))
        // Recovery
        .route("/api/recovery/queue", axum::routing::get(recovery_queue))
        .route("/api/recovery/history", axum::routing::get(recovery_history))
        .route("/api/recovery/stats", axum::routing::get(recovery_stats))
        .route("/api/recovery/force/:file_id", axum::routing::post(force_recovery))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let (nodes, active, files) = state.store.read(|t| {
        (t.nodes().count(), t.active_nodes().count(), t.file_count())
    });
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "nodes": nodes,
        "active_nodes": active,
        "files": files,
        "persistent": state.store.is_persistent(),
    }))
}

async fn register_node(
    State(state): State<CoordState>,
    Json(registration): Json<NodeRegistration>,
) -> ApiResult {
    let node = state.monitor.register_node(registration, timestamp_now())?;
    Ok(Json(json!({ "status": "success", "node": node })))
}

async fn heartbeat(State(state): State<CoordState>, Json(beat): Json<Heartbeat>) -> ApiResult {
    let node = state.monitor.receive_heartbeat(beat, timestamp_now())?;
    Ok(Json(json!({ "status": "success", "node_status": node.status })))
}

async fn list_nodes(State(state): State<CoordState>) -> impl IntoResponse {
    let nodes: Vec<NodeRecord> = state.store.read(|t| t.nodes().cloned().collect());
    Json(json!({ "total": nodes.len(), "nodes": nodes }))
}

async fn probe_node(State(state): State<CoordState>, Path(node_id): Path<String>) -> ApiResult {
    let report = state
        .monitor
        .probe_node(state.transport.as_ref(), &node_id)
        .await?;
    Ok(Json(json!({ "node_id": node_id, "probe": report })))
}

async fn upload_request(
    State(state): State<CoordState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult {
    let plan = catalog::request_upload(
        &state.store,
        &request,
        state.default_replication_factor,
        uuid::Uuid::new_v4().to_string(),
        timestamp_now(),
    )?;
    Ok(Json(json!({
        "status": "success",
        "file_id": plan.file_id,
        "replication_factor": plan.replication_factor,
        "upload_nodes": plan.upload_nodes,
    })))
}

async fn upload_confirm(
    State(state): State<CoordState>,
    Json(confirmation): Json<UploadConfirmation>,
) -> ApiResult {
    let created = catalog::confirm_replica(&state.store, &confirmation, timestamp_now())?;
    Ok(Json(json!({ "status": "success", "created": created })))
}

async fn download(State(state): State<CoordState>, Path(file_id): Path<String>) -> ApiResult {
    let plan = catalog::locate_download(&state.store, &file_id)?;
    Ok(Json(json!(plan)))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_page_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_page_limit() -> usize {
    100
}

async fn list_files(State(state): State<CoordState>, Query(page): Query<PageQuery>) -> impl IntoResponse {
    let listing = state
        .store
        .read(|t| catalog::list_files(t, page.limit, page.offset));
    Json(json!(listing))
}

async fn get_file(State(state): State<CoordState>, Path(file_id): Path<String>) -> ApiResult {
    let detail = state.store.read(|t| catalog::file_detail(t, &file_id))?;
    Ok(Json(json!(detail)))
}

async fn stats(State(state): State<CoordState>) -> impl IntoResponse {
    let mut stats = state.store.read(catalog::cluster_stats);
    stats.recovery_queue_length = state.scheduler.queue_summary().total;
    Json(json!(stats))
}

async fn force_replication(State(state): State<CoordState>) -> ApiResult {
    let report = state.reconciler.run_cycle(timestamp_now()).await?;
    Ok(Json(json!({ "status": "success", "report": report })))
}

async fn force_verification(State(state): State<CoordState>) -> ApiResult {
    let report = state.verifier.run_cycle(timestamp_now()).await?;
    Ok(Json(json!({ "status": "success", "report": report })))
}

async fn recovery_queue(State(state): State<CoordState>) -> impl IntoResponse {
    let queue = state.scheduler.queue();
    Json(json!({
        "total": queue.len(),
        "summary": state.scheduler.queue_summary(),
        "queue": queue,
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

async fn recovery_history(
    State(state): State<CoordState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let history = state.scheduler.history(query.limit);
    Json(json!({ "total": history.len(), "history": history }))
}

async fn recovery_stats(State(state): State<CoordState>) -> impl IntoResponse {
    Json(json!(state.scheduler.stats()))
}

async fn force_recovery(
    State(state): State<CoordState>,
    Path(file_id): Path<String>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    let priority = state.scheduler.force_recovery(&file_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "success",
            "message": "Recovery queued",
            "file_id": file_id,
            "priority": priority.value(),
        })),
    ))
}
