use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::{execute_after, Action, ExecutionContext, ExecutionResult};
use crate::errors::AppError;
use crate::models::payload::TenantDeletionDetails;

pub const CLOSED_STATUS: &str = "closed";

/// No deletion waits longer than a year, whatever the configuration says.
pub const COOLDOWN_CEILING_HOURS: i64 = 8760;

#[derive(Debug, Clone, Deserialize)]
pub struct TenantDeletionParams {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub cooldown_hours: Option<i64>,
}

/// Cooldown bounds for tenant deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionPolicy {
    pub default_cooldown_hours: i64,
    pub max_cooldown_hours: i64,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            default_cooldown_hours: 24,
            max_cooldown_hours: 168,
        }
    }
}

impl DeletionPolicy {
    /// Missing or non-positive values take the default; large values are clamped
    /// to the policy maximum and to `COOLDOWN_CEILING_HOURS`.
    pub fn resolve(&self, requested: Option<i64>) -> i64 {
        let max = self.max_cooldown_hours.clamp(1, COOLDOWN_CEILING_HOURS);
        match requested {
            Some(h) if h > 0 => h.min(max),
            _ => self.default_cooldown_hours.clamp(1, max),
        }
    }
}

/// Soft-closes a tenant after a mandatory cooldown.
pub struct TenantDeletion {
    policy: DeletionPolicy,
}

impl TenantDeletion {
    pub fn new(policy: DeletionPolicy) -> Self {
        Self { policy }
    }
}

pub(crate) fn parse_tenant_id(raw: &str) -> Result<Uuid, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidPayload("tenant_id is required".into()));
    }
    Uuid::parse_str(raw)
        .map_err(|_| AppError::InvalidPayload(format!("tenant_id '{}' is not a valid UUID", raw)))
}

#[async_trait]
impl Action for TenantDeletion {
    type Params = TenantDeletionParams;
    type Details = TenantDeletionDetails;

    async fn validate_create(&self, params: Self::Params) -> Result<Self::Details, AppError> {
        let tenant_id = parse_tenant_id(&params.tenant_id)?;
        Ok(TenantDeletionDetails {
            tenant_id,
            cooldown_hours: self.policy.resolve(params.cooldown_hours),
            execute_after: None,
            lifecycle_status: None,
        })
    }

    fn target_key(&self, details: &Self::Details) -> String {
        details.tenant_id.hyphenated().to_string()
    }

    fn confirmation_phrase(&self, details: &Self::Details) -> String {
        format!("DELETE {}", details.tenant_id.hyphenated())
    }

    // Stored rows may predate the ceiling.
    fn cooldown(&self, details: &Self::Details) -> Option<Duration> {
        Some(Duration::hours(
            details.cooldown_hours.clamp(0, COOLDOWN_CEILING_HOURS),
        ))
    }

    fn on_approve(
        &self,
        details: &mut Self::Details,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let cooldown = self.cooldown(details).unwrap_or_else(Duration::zero);
        let at = execute_after(now, cooldown)?;
        details.execute_after = Some(at);
        Ok(Some(at))
    }

    async fn execute(
        &self,
        details: &mut Self::Details,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionResult, AppError> {
        ctx.effects
            .close_tenant(details.tenant_id, ctx.actor)
            .await
            .map_err(|e| {
                tracing::error!(tenant_id = %details.tenant_id, "tenant close failed: {:#}", e);
                AppError::Downstream(format!("tenant close failed: {}", e))
            })?;
        details.lifecycle_status = Some(CLOSED_STATUS.to_string());

        Ok(ExecutionResult::TenantClosed {
            tenant_id: details.tenant_id,
            lifecycle_status: CLOSED_STATUS.to_string(),
        })
    }
}
