//! HTTP request handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use forklift_queue::{CycleOutcome, EnqueueOptions, QueueStats};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query for `POST /queues/{queue}/process`.
#[derive(Debug, Default, Deserialize)]
pub struct ProcessParams {
    /// Keep running cycles while batches come back full.
    #[serde(default)]
    pub drain: bool,
}

/// Body for `POST /queues/{queue}/jobs`.
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    pub delay_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub id: Uuid,
    pub queue: String,
    pub due_at: DateTime<Utc>,
}

/// Body for `POST /queues/{queue}/dead/retry`.
#[derive(Debug, Deserialize)]
pub struct RetryDeadRequest {
    #[serde(default = "default_retry_count")]
    pub count: usize,
}

fn default_retry_count() -> usize {
    1
}

#[derive(Debug, Serialize)]
pub struct RetryDeadResponse {
    pub moved: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub cycles_triggered: u64,
}

/// Run a processing cycle.
///
/// POST /queues/{queue}/process
pub async fn process_queue(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<CycleOutcome>, ApiError> {
    state.record_cycle_request();
    let processor = state.processor.clone();
    let name = queue.clone();

    // Popped messages only exist in this task until they are resolved, so it
    // must run to completion even if the client goes away.
    let cycle = tokio::spawn(async move {
        if params.drain {
            processor
                .drain(&name, processor.config().max_drain_cycles)
                .await
        } else {
            processor.run_cycle(&name).await
        }
    });
    let outcome = cycle
        .await
        .map_err(|e| ApiError::Internal(format!("processing task failed: {}", e)))??;

    debug!("Processing request for {} finished: {:?}", queue, outcome);
    Ok(Json(outcome))
}

/// Enqueue a job.
///
/// POST /queues/{queue}/jobs
pub async fn enqueue_job(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let options = EnqueueOptions {
        fingerprint: request.fingerprint,
        delay: request.delay_secs.map(Duration::from_secs),
        due_at: None,
        max_retries: request.max_retries,
    };
    let envelope = state
        .engine()
        .enqueue(&queue, &request.job_type, request.payload, options)
        .await?;

    info!("Enqueued {} job {} on {}", envelope.job_type, envelope.id, queue);
    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            id: envelope.id,
            queue: envelope.queue,
            due_at: envelope.due_at,
        }),
    ))
}

/// Bucket sizes.
///
/// GET /queues/{queue}/stats
pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.engine().stats(&queue).await?))
}

/// Requeue dead letters.
///
/// POST /queues/{queue}/dead/retry
pub async fn retry_dead(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    body: Result<Json<RetryDeadRequest>, JsonRejection>,
) -> Result<Json<RetryDeadResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let moved = state
        .engine()
        .retry_deadletter(&queue, request.count)
        .await?;
    Ok(Json(RetryDeadResponse { moved }))
}

/// Health check.
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime().as_secs(),
        cycles_triggered: state.cycles_triggered(),
    })
}
