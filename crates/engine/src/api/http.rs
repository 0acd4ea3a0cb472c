//! HTTP routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use opencore_domain::RequesterId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::infrastructure::audit::SqliteAuditLog;
use crate::infrastructure::ports::AuditEntry;
use crate::infrastructure::responses::{SqliteResponseInbox, StoredResponse};
use crate::orchestrator::{LlmOrchestrator, OrchestratorStatus};

/// Shared state for the operational routes.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<LlmOrchestrator>,
    pub audit: Arc<SqliteAuditLog>,
    pub inbox: Arc<SqliteResponseInbox>,
}

/// Create all HTTP routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/audit/recent", get(recent_audit))
        .route("/responses/{requester}/recent", get(recent_responses))
        .route("/policies", get(list_policies))
        .route("/policies/reload", post(reload_policies))
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<ApiState>) -> Json<OrchestratorStatus> {
    Json(state.engine.status())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<u32>,
}

const MAX_RECENT: u32 = 100;

impl RecentQuery {
    fn limit(&self) -> Result<u32, ApiError> {
        let limit = self.limit.unwrap_or(10);
        if limit == 0 || limit > MAX_RECENT {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_RECENT}"
            )));
        }
        Ok(limit)
    }
}

async fn recent_audit(
    State(state): State<ApiState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let limit = query.limit()?;
    let entries = state
        .audit
        .recent(limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(entries))
}

/// Stored answers for one requester, newest first.
async fn recent_responses(
    State(state): State<ApiState>,
    Path(requester): Path<Uuid>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<StoredResponse>>, ApiError> {
    let limit = query.limit()?;
    let responses = state
        .inbox
        .recent(RequesterId::from_uuid(requester), limit)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(responses))
}

#[derive(Debug, Serialize)]
struct PolicyList {
    policies: Vec<String>,
}

async fn list_policies(State(state): State<ApiState>) -> Json<PolicyList> {
    Json(PolicyList {
        policies: state.engine.policies().names(),
    })
}

async fn reload_policies(State(state): State<ApiState>) -> Result<Json<PolicyList>, ApiError> {
    let loaded = state
        .engine
        .policies()
        .reload()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    tracing::info!(loaded, "Policy templates reloaded");
    Ok(Json(PolicyList {
        policies: state.engine.policies().names(),
    }))
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::BadRequest(msg) => {
                (axum::http::StatusCode::BAD_REQUEST, msg).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                )
                    .into_response()
            }
        }
    }
}
