//! HTTP API for the node registry
//!
//! This is the inbound side of the fleet: health senders post heartbeats
//! here, operators register nodes, and the repair executor reads the
//! backlog. Store calls take file locks and open RocksDB, so they run on
//! the blocking pool.

use crate::common::{Error, Result};
use crate::registry::model::{
    DaemonReport, DiskReport, Heartbeat, NodeEntry, NodeMode, NodeSpec, TargetKind,
};
use crate::registry::{MaintenanceBacklog, NodeRegistry};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Shared state for registry handlers.
#[derive(Clone)]
pub struct RegistryState {
    pub registry: Arc<NodeRegistry>,
    pub backlog: Arc<MaintenanceBacklog>,
}

/// Error wrapper turning crate errors into JSON responses
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
            tracing::error!("registry request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Other(format!("store task failed: {}", e)))?
}

fn found<T>(value: Option<T>, hostname: &str) -> ApiResult<T> {
    value.ok_or_else(|| ApiError(Error::NotFound(format!("node {}", hostname))))
}

/// Creates the HTTP router with all registry endpoints.
pub fn create_router(state: RegistryState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/heartbeat", post(heartbeat))
        .route("/nodes", get(list_nodes).post(add_node))
        .route("/nodes/:hostname", get(get_node).delete(deregister_node))
        .route("/nodes/:hostname/disk-report", put(put_disk_report))
        .route("/nodes/:hostname/daemon-report", put(put_daemon_report))
        .route("/nodes/:hostname/spec", get(get_spec).put(put_spec))
        .route("/backlog", get(list_backlog))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}

async fn heartbeat(
    State(state): State<RegistryState>,
    Json(heartbeat): Json<Heartbeat>,
) -> ApiResult<Json<NodeEntry>> {
    let hostname = heartbeat.hostname.clone();
    let registry = state.registry.clone();
    let entry = blocking(move || registry.apply_heartbeat(&heartbeat)).await?;
    tracing::debug!(%hostname, applied = entry.is_some(), "heartbeat");
    Ok(Json(found(entry, &hostname)?))
}

#[derive(Debug, Deserialize)]
struct ListNodesQuery {
    mode: Option<String>,
}

async fn list_nodes(
    State(state): State<RegistryState>,
    Query(query): Query<ListNodesQuery>,
) -> ApiResult<Json<Vec<NodeEntry>>> {
    let mode = match query.mode.as_deref() {
        Some(raw) => Some(raw.parse::<NodeMode>().map_err(Error::InvalidConfig)?),
        None => None,
    };
    let registry = state.registry.clone();
    let nodes = blocking(move || registry.query(|e| mode.map_or(true, |m| e.mode == m))).await?;
    Ok(Json(nodes))
}

#[derive(Debug, Deserialize)]
struct AddNodeRequest {
    hostname: String,
}

async fn add_node(
    State(state): State<RegistryState>,
    Json(req): Json<AddNodeRequest>,
) -> ApiResult<impl IntoResponse> {
    let entry = NodeEntry::new(req.hostname, crate::common::timestamp_now());
    let registry = state.registry.clone();
    let stored = entry.clone();
    let created = blocking(move || registry.add_node(&stored)).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "hostname": entry.hostname, "created": created }))))
}

async fn get_node(
    State(state): State<RegistryState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<NodeEntry>> {
    let registry = state.registry.clone();
    let name = hostname.clone();
    let entry = blocking(move || registry.get(&name)).await?;
    Ok(Json(found(entry, &hostname)?))
}

async fn deregister_node(
    State(state): State<RegistryState>,
    Path(hostname): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.registry.clone();
    let backlog = state.backlog.clone();
    let name = hostname.clone();
    let removed = blocking(move || {
        let removed = registry.deregister(&name)?;
        if removed {
            backlog.delete(&name)?;
        }
        Ok(removed)
    })
    .await?;
    found(removed.then_some(()), &hostname)?;
    Ok(Json(json!({ "status": "deregistered", "hostname": hostname })))
}

async fn put_disk_report(
    State(state): State<RegistryState>,
    Path(hostname): Path<String>,
    Json(report): Json<DiskReport>,
) -> ApiResult<Json<NodeEntry>> {
    let registry = state.registry.clone();
    let name = hostname.clone();
    let entry = blocking(move || registry.update_disk_report(&name, report)).await?;
    Ok(Json(found(entry, &hostname)?))
}

async fn put_daemon_report(
    State(state): State<RegistryState>,
    Path(hostname): Path<String>,
    Json(report): Json<DaemonReport>,
) -> ApiResult<Json<NodeEntry>> {
    let registry = state.registry.clone();
    let name = hostname.clone();
    let entry = blocking(move || registry.update_daemon_report(&name, report)).await?;
    Ok(Json(found(entry, &hostname)?))
}

async fn get_spec(
    State(state): State<RegistryState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<NodeSpec>> {
    let registry = state.registry.clone();
    let name = hostname.clone();
    let spec = blocking(move || registry.get_spec(&name)).await?;
    Ok(Json(found(spec, &hostname)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpecRequest {
    disk_count: u32,
    disk_capacity: u64,
}

async fn put_spec(
    State(state): State<RegistryState>,
    Path(hostname): Path<String>,
    Json(req): Json<SpecRequest>,
) -> ApiResult<Json<NodeSpec>> {
    let spec = NodeSpec {
        hostname,
        disk_count: req.disk_count,
        disk_capacity: req.disk_capacity,
        updated_at: crate::common::timestamp_now(),
    };
    let registry = state.registry.clone();
    let stored = spec.clone();
    blocking(move || {
        if registry.get(&stored.hostname)?.is_none() {
            return Err(Error::NotFound(format!("node {}", stored.hostname)));
        }
        registry.put_spec(&stored)
    })
    .await?;
    Ok(Json(spec))
}

#[derive(Debug, Deserialize)]
struct BacklogQuery {
    target: Option<String>,
}

async fn list_backlog(
    State(state): State<RegistryState>,
    Query(query): Query<BacklogQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind = match query.target.as_deref() {
        Some(raw) => Some(raw.parse::<TargetKind>().map_err(Error::InvalidConfig)?),
        None => None,
    };
    let backlog = state.backlog.clone();
    let tasks = blocking(move || match kind {
        Some(kind) => backlog.list_by_target(kind),
        None => backlog.list(),
    })
    .await?;
    Ok(Json(json!({ "tasks": tasks, "total": tasks.len() })))
}
