use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::ApprovalPayload;
use crate::errors::AppError;

/// Default page size for ledger listings.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Hard ceiling; larger limits fall back to the default.
pub const MAX_PAGE_SIZE: i64 = 200;

/// A row of the approval ledger, with its payload decoded.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub action_type: ActionType,
    pub target_key: String,
    pub payload: ApprovalPayload,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Everything the ledger needs to open a new `pending` row.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub action_type: ActionType,
    pub target_key: String,
    pub payload: ApprovalPayload,
    pub requested_by: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl NewApproval {
    pub fn into_request(self, id: Uuid) -> ApprovalRequest {
        ApprovalRequest {
            id,
            action_type: self.action_type,
            target_key: self.target_key,
            payload: self.payload,
            status: ApprovalStatus::Pending,
            requested_by: self.requested_by,
            approved_by: None,
            reason: self.reason,
            created_at: self.created_at,
            approved_at: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ActionType {
    SecretRotation,
    TenantDeletion,
    AddonActivation,
}

impl ActionType {
    pub const ALL: [ActionType; 3] = [
        ActionType::SecretRotation,
        ActionType::TenantDeletion,
        ActionType::AddonActivation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SecretRotation => "secret_rotation",
            ActionType::TenantDeletion => "tenant_deletion",
            ActionType::AddonActivation => "addon_activation",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| AppError::InvalidPayload(format!("unknown action type '{}'", s.trim())))
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Executed => "executed",
        }
    }

    /// Pending and approved rows block new requests for the same target.
    pub fn is_active(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Approved)
    }

    /// Single-step edges of the lifecycle graph.
    pub fn can_transition_to(&self, next: ApprovalStatus) -> bool {
        matches!(
            (self, next),
            (ApprovalStatus::Pending, ApprovalStatus::Approved)
                | (ApprovalStatus::Pending, ApprovalStatus::Rejected)
                | (ApprovalStatus::Approved, ApprovalStatus::Executed)
        )
    }

    /// Forward reachability; `pending -> executed` passes through `approved`.
    pub fn can_reach(&self, next: ApprovalStatus) -> bool {
        self.can_transition_to(next)
            || (*self == ApprovalStatus::Pending && next == ApprovalStatus::Executed)
    }

    /// The conflict reported when a transition expected `self` but found `actual`.
    pub fn mismatch(&self, actual: ApprovalStatus) -> AppError {
        match (self, actual) {
            (ApprovalStatus::Pending, _) => AppError::NotPending,
            (ApprovalStatus::Approved, ApprovalStatus::Executed) => AppError::AlreadyExecuted,
            _ => AppError::NotApproved,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "executed" => Ok(ApprovalStatus::Executed),
            other => Err(AppError::InvalidPayload(format!("unknown status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl FromStr for ReviewDecision {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(ReviewDecision::Approve),
            "reject" | "rejected" => Ok(ReviewDecision::Reject),
            other => Err(AppError::InvalidDecision(format!(
                "'{}' (use approve|reject)",
                other
            ))),
        }
    }
}

/// Ledger listing filters. Construct with [`ListFilter::new`] so paging is clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct ListFilter {
    pub action_type: Option<ActionType>,
    pub target_key: Option<String>,
    pub status: Option<ApprovalStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl ListFilter {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 && l <= MAX_PAGE_SIZE => l,
            _ => DEFAULT_PAGE_SIZE,
        };
        Self {
            action_type: None,
            target_key: None,
            status: None,
            limit,
            offset: offset.unwrap_or(0).max(0),
        }
    }

    pub fn matches(&self, row: &ApprovalRequest) -> bool {
        self.action_type.map_or(true, |t| t == row.action_type)
            && self
                .target_key
                .as_deref()
                .map_or(true, |k| k == row.target_key)
            && self.status.map_or(true, |s| s == row.status)
    }
}

impl Default for ListFilter {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_graph_is_monotonic() {
        use ApprovalStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Executed));
        assert!(!Pending.can_transition_to(Executed));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Rejected.can_reach(Approved));
        assert!(!Executed.can_reach(Approved));
        assert!(Pending.can_reach(Executed));
    }

    #[test]
    fn test_mismatch_picks_contextual_error() {
        use ApprovalStatus::*;
        assert!(matches!(Pending.mismatch(Approved), AppError::NotPending));
        assert!(matches!(Approved.mismatch(Executed), AppError::AlreadyExecuted));
        assert!(matches!(Approved.mismatch(Pending), AppError::NotApproved));
        assert!(matches!(Approved.mismatch(Rejected), AppError::NotApproved));
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!("Approve".parse::<ReviewDecision>().unwrap(), ReviewDecision::Approve);
        assert_eq!(" rejected ".parse::<ReviewDecision>().unwrap(), ReviewDecision::Reject);
        assert!(matches!(
            "maybe".parse::<ReviewDecision>(),
            Err(AppError::InvalidDecision(_))
        ));
    }

    #[test]
    fn test_action_type_round_trips_through_str() {
        for t in ActionType::ALL {
            assert_eq!(t.as_str().parse::<ActionType>().unwrap(), t);
        }
        assert!("tenant_nuke".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_page_limits_fall_back_to_default() {
        assert_eq!(ListFilter::new(None, None).limit, DEFAULT_PAGE_SIZE);
        assert_eq!(ListFilter::new(Some(0), None).limit, DEFAULT_PAGE_SIZE);
        assert_eq!(ListFilter::new(Some(500), None).limit, DEFAULT_PAGE_SIZE);
        assert_eq!(ListFilter::new(Some(200), None).limit, 200);
        assert_eq!(ListFilter::new(Some(10), Some(-5)).offset, 0);
    }
}
