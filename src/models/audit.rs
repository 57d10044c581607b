use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::approval::ActionType;

pub const RESOURCE_TYPE: &str = "approval_request";

/// Immutable record of one transition or one refused attempt.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub actor_id: String,
    /// `platform.security.<action_type>.<verb>`
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditVerb {
    Request,
    Approve,
    Reject,
    Execute,
    Denied,
}

impl AuditVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditVerb::Request => "request",
            AuditVerb::Approve => "approve",
            AuditVerb::Reject => "reject",
            AuditVerb::Execute => "execute",
            AuditVerb::Denied => "denied",
        }
    }
}

/// Audit action name. Attempts refused before the action type is known are
/// filed under `approval`.
pub fn action_name(action_type: Option<ActionType>, verb: AuditVerb) -> String {
    let subject = action_type.map_or("approval", |t| t.as_str());
    format!("platform.security.{}.{}", subject, verb.as_str())
}

impl AuditEntry {
    pub fn new(
        actor_id: impl Into<String>,
        action_type: Option<ActionType>,
        verb: AuditVerb,
        resource_id: Option<Uuid>,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let outcome = if verb == AuditVerb::Denied {
            AuditOutcome::Denied
        } else {
            AuditOutcome::Allowed
        };
        Self {
            id: Uuid::new_v4(),
            created_at,
            actor_id: actor_id.into(),
            action: action_name(action_type, verb),
            resource_type: RESOURCE_TYPE.to_string(),
            resource_id,
            outcome,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(
            action_name(Some(ActionType::TenantDeletion), AuditVerb::Execute),
            "platform.security.tenant_deletion.execute"
        );
        assert_eq!(
            action_name(None, AuditVerb::Denied),
            "platform.security.approval.denied"
        );
    }

    #[test]
    fn test_denied_verb_sets_outcome() {
        let e = AuditEntry::new(
            "ops-1",
            Some(ActionType::SecretRotation),
            AuditVerb::Denied,
            None,
            serde_json::json!({}),
            Utc::now(),
        );
        assert_eq!(e.outcome, AuditOutcome::Denied);
        assert_eq!(e.resource_type, RESOURCE_TYPE);
    }
}
