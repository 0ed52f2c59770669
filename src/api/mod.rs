//! HTTP surface over the supervisor.
//!
//! Handlers are thin: they parse ids and bodies, call one supervisor
//! operation and map [`WardenError`] onto a status code with a JSON
//! `{"error": ...}` body.

use crate::error::WardenError;
use crate::process::{NewScalingRule, ProcessId, ProcessRecord, ProcessStatus, ScalingRule, Supervisor};
use crate::scaling::rank_by_load;
use crate::state::ProcessFilter;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Body of `POST /processes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/processes", get(list_handler).post(start_handler))
        .route("/processes/ranking", get(ranking_handler))
        .route("/processes/scaling-rule", post(add_rule_handler))
        .route("/processes/scaling-rules", get(rules_handler))
        .route("/processes/:id", get(get_handler).delete(delete_handler))
        .route("/processes/:id/stop", post(stop_handler))
        .route("/processes/:id/restart", post(restart_handler))
        .with_state(supervisor)
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn list_handler(
    State(supervisor): State<Supervisor>,
) -> Result<Json<Vec<ProcessRecord>>, ApiError> {
    Ok(Json(supervisor.list()?))
}

async fn start_handler(
    State(supervisor): State<Supervisor>,
    Json(req): Json<StartRequest>,
) -> Result<(StatusCode, Json<ProcessRecord>), ApiError> {
    if req.name.trim().is_empty() || req.command.trim().is_empty() {
        return Err(WardenError::InvalidRequest(
            "name and command must not be empty".to_string(),
        )
        .into());
    }

    info!("Starting process {}: {}", req.name, req.command);

    let record = supervisor.start(&req.name, &req.command).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn ranking_handler(
    State(supervisor): State<Supervisor>,
) -> Result<Json<Vec<ProcessRecord>>, ApiError> {
    let running = supervisor.find_by(&ProcessFilter::running())?;
    Ok(Json(rank_by_load(&running)))
}

async fn get_handler(
    State(supervisor): State<Supervisor>,
    Path(id): Path<String>,
) -> Result<Json<ProcessRecord>, ApiError> {
    let id: ProcessId = id.parse()?;
    Ok(Json(supervisor.get(id)?))
}

async fn delete_handler(
    State(supervisor): State<Supervisor>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id: ProcessId = id.parse()?;

    match supervisor.delete(id).await? {
        Some(record) => Ok(Json(MessageResponse {
            message: format!("Process {} ({}) deleted", record.name, id),
        })),
        None => Err(WardenError::ProcessNotFound(id.to_string()).into()),
    }
}

async fn stop_handler(
    State(supervisor): State<Supervisor>,
    Path(id): Path<String>,
) -> Result<Json<ProcessRecord>, ApiError> {
    let id: ProcessId = id.parse()?;
    let record = supervisor.stop(id).await?;

    if record.status != ProcessStatus::Stopped {
        return Err(ApiError::Internal(format!(
            "Failed to stop process {}: status is {}",
            id, record.status
        )));
    }

    Ok(Json(record))
}

async fn restart_handler(
    State(supervisor): State<Supervisor>,
    Path(id): Path<String>,
) -> Result<Json<ProcessRecord>, ApiError> {
    let id: ProcessId = id.parse()?;
    Ok(Json(supervisor.restart(id).await?))
}

async fn add_rule_handler(
    State(supervisor): State<Supervisor>,
    Json(rule): Json<NewScalingRule>,
) -> Result<(StatusCode, Json<ScalingRule>), ApiError> {
    let rule = supervisor.add_scaling_rule(rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn rules_handler(
    State(supervisor): State<Supervisor>,
) -> Result<Json<Vec<ScalingRule>>, ApiError> {
    Ok(Json(supervisor.scaling_rules()?))
}

/// Error returned by a handler
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<WardenError> for ApiError {
    fn from(err: WardenError) -> Self {
        match err {
            WardenError::ProcessNotFound(_) => ApiError::NotFound(err.to_string()),
            WardenError::InvalidScalingRule(_) | WardenError::InvalidRequest(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            error!("API error: {} - {}", status, message);
        } else {
            warn!("API error: {} - {}", status, message);
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
