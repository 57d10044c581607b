use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::approval::ActionType;

#[derive(Debug, Error)]
pub enum AppError {
    // -- validation --
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid secret name: {0}")]
    InvalidSecretName(String),

    #[error("invalid review decision: {0}")]
    InvalidDecision(String),

    #[error("confirmation is required")]
    ConfirmationRequired,

    #[error("missing actor identity")]
    MissingActor,

    // -- state conflicts --
    #[error("approval request {0} not found")]
    NotFound(Uuid),

    #[error("approval request is not pending")]
    NotPending,

    #[error("approval request is not approved")]
    NotApproved,

    #[error("approval request is already executed")]
    AlreadyExecuted,

    #[error("a {action_type} request is already in flight for {target_key}")]
    DuplicateInFlight {
        action_type: ActionType,
        target_key: String,
    },

    #[error("add-on {addon_id} is already active for this tenant")]
    AddonAlreadyActive { addon_id: String },

    // -- policy guards --
    #[error("approval request cannot be approved by its requester")]
    SelfApproval,

    #[error("approval request is in cooldown until {execute_after}")]
    CooldownActive { execute_after: DateTime<Utc> },

    #[error("confirmation did not match")]
    InvalidConfirmation,

    // -- downstream / infrastructure --
    #[error("execution failed: {0}")]
    Downstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code, shared by responses, audit entries and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidPayload(_) => "invalid_payload",
            AppError::InvalidSecretName(_) => "invalid_secret_name",
            AppError::InvalidDecision(_) => "invalid_decision",
            AppError::ConfirmationRequired => "confirmation_required",
            AppError::MissingActor => "missing_actor",
            AppError::NotFound(_) => "not_found",
            AppError::NotPending => "not_pending",
            AppError::NotApproved => "not_approved",
            AppError::AlreadyExecuted => "already_executed",
            AppError::DuplicateInFlight { .. } => "duplicate_in_flight",
            AppError::AddonAlreadyActive { .. } => "addon_already_active",
            AppError::SelfApproval => "self_approval",
            AppError::CooldownActive { .. } => "cooldown_active",
            AppError::InvalidConfirmation => "invalid_confirmation",
            AppError::Downstream(_) => "execution_failed",
            AppError::Database(_) | AppError::Internal(_) => "internal_server_error",
        }
    }

    /// Error class reported in the response envelope.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::InvalidPayload(_)
            | AppError::InvalidSecretName(_)
            | AppError::InvalidDecision(_)
            | AppError::ConfirmationRequired => "invalid_request_error",
            AppError::MissingActor => "authentication_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::NotPending
            | AppError::NotApproved
            | AppError::AlreadyExecuted
            | AppError::DuplicateInFlight { .. }
            | AppError::AddonAlreadyActive { .. } => "conflict_error",
            AppError::SelfApproval
            | AppError::CooldownActive { .. }
            | AppError::InvalidConfirmation => "policy_error",
            AppError::Downstream(_) => "upstream_error",
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidPayload(_)
            | AppError::InvalidSecretName(_)
            | AppError::InvalidDecision(_)
            | AppError::ConfirmationRequired
            | AppError::InvalidConfirmation => StatusCode::BAD_REQUEST,
            AppError::MissingActor => StatusCode::UNAUTHORIZED,
            AppError::SelfApproval => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotPending
            | AppError::NotApproved
            | AppError::AlreadyExecuted
            | AppError::DuplicateInFlight { .. }
            | AppError::AddonAlreadyActive { .. }
            | AppError::CooldownActive { .. } => StatusCode::CONFLICT,
            AppError::Downstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for failures that say nothing about the request itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Internal(_))
    }
}

/// Unreadable bodies get the standard envelope instead of axum's plain text.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidPayload(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let msg = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "internal server error".to_string()
            }
            AppError::Downstream(e) => {
                tracing::error!("Execution side effect failed: {}", e);
                self.to_string()
            }
            other => other.to_string(),
        };

        let mut error = json!({
            "message": msg,
            "type": self.error_type(),
            "code": self.code(),
        });
        if let AppError::CooldownActive { execute_after } = &self {
            error["execute_after"] = json!(execute_after);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_errors_map_to_expected_status() {
        assert_eq!(AppError::SelfApproval.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotPending.status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::InvalidConfirmation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::NotFound(Uuid::nil()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Downstream("boom".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak_detail() {
        let resp = AppError::Internal(anyhow::anyhow!("password=hunter2")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_codes_are_snake_case() {
        let errs = [
            AppError::DuplicateInFlight {
                action_type: ActionType::TenantDeletion,
                target_key: "t".into(),
            },
            AppError::CooldownActive {
                execute_after: Utc::now(),
            },
            AppError::ConfirmationRequired,
        ];
        for e in errs {
            assert!(e.code().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
