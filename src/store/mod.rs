pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::actions::{ExecutionResult, SideEffects};
use crate::errors::AppError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, ListFilter, NewApproval};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Output of a successful transition: the row as written, plus the side-effect
/// result when the transition executed the action.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub row: ApprovalRequest,
    pub result: Option<ExecutionResult>,
}

/// Computes the next state of a locked row. Side effects run here through
/// `effects`, which share the row's transaction, so a failure leaves both the
/// stored row and the collaborators untouched.
#[async_trait]
pub trait Mutator: Send + Sync {
    async fn mutate(
        &self,
        current: ApprovalRequest,
        effects: &dyn SideEffects,
    ) -> Result<Transitioned, AppError>;
}

/// The approval ledger. One row per request, never deleted.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Open a `pending` row. Fails `DuplicateInFlight` while another pending or
    /// approved row holds the same `(action_type, target_key)`.
    async fn insert(&self, new: NewApproval) -> Result<ApprovalRequest, AppError>;

    async fn get(&self, id: Uuid) -> Result<ApprovalRequest, AppError>;

    /// Newest first.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ApprovalRequest>, AppError>;

    /// Atomic read-modify-write of one row that must currently be in `expected`.
    async fn transition(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        mutator: &dyn Mutator,
    ) -> Result<Transitioned, AppError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Rejects mutator output that would break the ledger's invariants.
pub(crate) fn check_transition(
    before: &ApprovalRequest,
    after: &ApprovalRequest,
) -> Result<(), AppError> {
    if after.id != before.id
        || after.action_type != before.action_type
        || after.target_key != before.target_key
        || after.requested_by != before.requested_by
        || after.created_at != before.created_at
    {
        return Err(AppError::Internal(anyhow::anyhow!(
            "transition of {} rewrote immutable fields",
            before.id
        )));
    }
    if after.payload.details.action_type() != before.action_type {
        return Err(AppError::Internal(anyhow::anyhow!(
            "transition of {} swapped its {} details",
            before.id,
            before.action_type
        )));
    }
    if !before.status.can_reach(after.status) {
        return Err(AppError::Internal(anyhow::anyhow!(
            "illegal transition {} -> {} for {}",
            before.status,
            after.status,
            before.id
        )));
    }
    let executed = after.status == ApprovalStatus::Executed;
    if executed != after.payload.timeline.executed_at.is_some() {
        return Err(AppError::Internal(anyhow::anyhow!(
            "executed_at does not match status {} for {}",
            after.status,
            before.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::approval::ActionType;
    use crate::models::payload::{
        ActionDetails, ApprovalPayload, SecretRotationDetails, TenantDeletionDetails,
    };
    use chrono::Utc;

    fn row() -> ApprovalRequest {
        let now = Utc::now();
        NewApproval {
            action_type: ActionType::SecretRotation,
            target_key: "jwt".into(),
            payload: ApprovalPayload::new(
                ActionDetails::SecretRotation(SecretRotationDetails {
                    secret_name: "jwt".into(),
                    env_var: "JWT_SECRETS".into(),
                    generated_format: None,
                    generated_fingerprint: None,
                }),
                "rotate".into(),
                now,
            ),
            requested_by: "ops-1".into(),
            reason: "rotate".into(),
            created_at: now,
        }
        .into_request(Uuid::new_v4())
    }

    #[test]
    fn test_backwards_transition_is_refused() {
        let before = row();
        let mut after = before.clone();
        after.status = ApprovalStatus::Rejected;
        assert!(check_transition(&before, &after).is_ok());

        let mut approved = before.clone();
        approved.status = ApprovalStatus::Approved;
        let mut back = approved.clone();
        back.status = ApprovalStatus::Pending;
        assert!(check_transition(&approved, &back).is_err());
    }

    #[test]
    fn test_executed_requires_timestamp() {
        let mut before = row();
        before.status = ApprovalStatus::Approved;
        let mut after = before.clone();
        after.status = ApprovalStatus::Executed;
        assert!(check_transition(&before, &after).is_err());
        after.payload.timeline.executed_at = Some(Utc::now());
        assert!(check_transition(&before, &after).is_ok());
    }

    #[test]
    fn test_immutable_fields_are_guarded() {
        let before = row();
        let mut after = before.clone();
        after.status = ApprovalStatus::Approved;
        after.target_key = "data_encryption".into();
        assert!(check_transition(&before, &after).is_err());
    }

    #[test]
    fn test_details_must_match_action_type() {
        let before = row();
        let mut after = before.clone();
        after.status = ApprovalStatus::Approved;
        after.payload.details = ActionDetails::TenantDeletion(TenantDeletionDetails {
            tenant_id: Uuid::new_v4(),
            cooldown_hours: 24,
            execute_after: None,
            lifecycle_status: None,
        });
        assert!(check_transition(&before, &after).is_err());
    }
}
