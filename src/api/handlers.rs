use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::Actor;
use crate::audit::AuditFilter;
use crate::errors::AppError;
use crate::models::approval::{ActionType, ApprovalStatus, ListFilter};
use crate::workflow::{ExecuteInput, ReviewInput};
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

/// Query strings are taken as text so bad values surface as `invalid_payload`.
#[derive(Debug, Default, Deserialize)]
pub struct ListApprovalsQuery {
    pub action_type: Option<String>,
    pub target_key: Option<String>,
    pub status: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub resource_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewBody {
    #[serde(default)]
    pub decision: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub activate_now: bool,
    pub billing_reference: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub confirmation: String,
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::InvalidPayload(format!("'{}' is not a valid request id", raw)))
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Unparseable page numbers fall back to the defaults.
fn page_number(raw: Option<String>) -> Option<i64> {
    non_empty(raw).and_then(|s| s.parse().ok())
}

impl ListApprovalsQuery {
    fn into_filter(self) -> Result<ListFilter, AppError> {
        let mut filter = ListFilter::new(page_number(self.limit), page_number(self.offset));
        filter.action_type = non_empty(self.action_type)
            .map(|s| s.parse::<ActionType>())
            .transpose()?;
        filter.status = non_empty(self.status)
            .map(|s| s.parse::<ApprovalStatus>())
            .transpose()?;
        filter.target_key = non_empty(self.target_key);
        Ok(filter)
    }
}

// ── Approval handlers ────────────────────────────────────────

/// GET /api/v1/approvals
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListApprovalsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter()?;
    let rows = state.service.list_requests(&filter).await?;
    Ok(Json(rows))
}

/// POST /api/v1/approvals
///
/// Body is tagged by `action_type`; the remaining fields depend on the action.
pub async fn create_approval(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body?;
    let row = state.service.create_request_json(&actor, body).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/approvals/:id
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let row = state.service.get_request(id).await?;
    Ok(Json(row))
}

/// POST /api/v1/approvals/:id/review
pub async fn review_approval(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    body: Result<Json<ReviewBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let Json(body) = body?;
    let outcome = state
        .service
        .review_request(
            id,
            ReviewInput {
                reviewer: actor,
                decision: body.decision,
                notes: body.notes,
                activate_now: body.activate_now,
                billing_reference: body.billing_reference,
            },
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/approvals/:id/execute
///
/// For secret rotation the response carries the new secret. It is not stored
/// and cannot be fetched again.
pub async fn execute_approval(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&id)?;
    let Json(body) = body?;
    let outcome = state
        .service
        .execute_request(
            id,
            ExecuteInput {
                executor: actor,
                confirmation: body.confirmation,
            },
        )
        .await?;
    Ok(Json(outcome))
}

// ── Audit handlers ───────────────────────────────────────────

/// GET /api/v1/audit
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let resource_id = non_empty(query.resource_id)
        .map(|s| parse_id(&s))
        .transpose()?;
    let filter = AuditFilter::new(
        resource_id,
        page_number(query.limit),
        page_number(query.offset),
    );
    let entries = state.service.list_audit(&filter).await?;
    Ok(Json(entries))
}
