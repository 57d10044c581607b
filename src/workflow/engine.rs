use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::clock::Clock;
use crate::actions::{
    AddonActivation, Adapters, CreateParams, ExecutionContext, ExecutionResult, SideEffects,
};
use crate::audit::{self, AuditFilter, AuditSink};
use crate::errors::AppError;
use crate::metrics::WorkflowMetrics;
use crate::models::approval::{
    ActionType, ApprovalRequest, ApprovalStatus, ListFilter, NewApproval, ReviewDecision,
};
use crate::models::audit::{AuditEntry, AuditVerb};
use crate::models::payload::{ActionDetails, ApprovalPayload};
use crate::store::{Ledger, Mutator, Transitioned};

const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub requested_by: String,
    pub reason: String,
    pub params: CreateParams,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewInput {
    pub reviewer: String,
    pub decision: String,
    pub notes: Option<String>,
    /// Add-on only: approve and activate in one step.
    pub activate_now: bool,
    pub billing_reference: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteInput {
    pub executor: String,
    pub confirmation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub request: ApprovalRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteOutcome {
    pub request: ApprovalRequest,
    pub result: ExecutionResult,
}

/// The shared request / review / execute lifecycle.
///
/// Guards run in a fixed order and the first failure wins. Every transition and
/// every refusal is audited; refusals never touch the stored row.
pub struct ApprovalService {
    ledger: Arc<dyn Ledger>,
    adapters: Arc<Adapters>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    metrics: WorkflowMetrics,
}

impl ApprovalService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        adapters: Arc<Adapters>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        metrics: WorkflowMetrics,
    ) -> Self {
        Self {
            ledger,
            adapters,
            audit,
            clock,
            metrics,
        }
    }

    pub fn metrics(&self) -> &WorkflowMetrics {
        &self.metrics
    }

    pub async fn ready(&self) -> Result<(), AppError> {
        self.ledger.ping().await
    }

    // -- CreateRequest --

    pub async fn create_request(&self, input: CreateRequest) -> Result<ApprovalRequest, AppError> {
        let action_type = input.params.action_type();
        let actor = input.requested_by.trim().to_string();
        if actor.is_empty() {
            return Err(self
                .deny(ANONYMOUS, Some(action_type), None, AppError::MissingActor)
                .await);
        }

        let prepared = match self.adapters.prepare(input.params).await {
            Ok(p) => p,
            Err(e) => return Err(self.deny(&actor, Some(action_type), None, e).await),
        };

        let reason = input.reason.trim().to_string();
        if reason.is_empty() {
            let err = AppError::InvalidPayload("reason is required".into());
            return Err(self.deny(&actor, Some(action_type), None, err).await);
        }

        let now = self.clock.now();
        let new = NewApproval {
            action_type: prepared.action_type,
            target_key: prepared.target_key,
            payload: ApprovalPayload::new(prepared.details, reason.clone(), now),
            requested_by: actor.clone(),
            reason,
            created_at: now,
        };
        let row = match self.ledger.insert(new).await {
            Ok(row) => row,
            Err(e) => return Err(self.deny(&actor, Some(action_type), None, e).await),
        };

        tracing::info!(
            request_id = %row.id,
            action_type = %row.action_type,
            target_key = %row.target_key,
            requested_by = %row.requested_by,
            "approval requested"
        );
        self.metrics.record_transition(action_type, "request");
        self.emit(&actor, &row, AuditVerb::Request, json!({})).await;
        Ok(row)
    }

    /// Create from an untyped body tagged by `action_type`, as received over HTTP.
    pub async fn create_request_json(
        &self,
        requested_by: &str,
        body: Value,
    ) -> Result<ApprovalRequest, AppError> {
        let action_type = body
            .get("action_type")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<ActionType>().ok());
        match parse_create_body(requested_by, body) {
            Ok(input) => self.create_request(input).await,
            Err(e) => {
                let actor = match requested_by.trim() {
                    "" => ANONYMOUS,
                    a => a,
                };
                Err(self.deny(actor, action_type, None, e).await)
            }
        }
    }

    // -- ListRequests / GetRequest --

    pub async fn list_requests(&self, filter: &ListFilter) -> Result<Vec<ApprovalRequest>, AppError> {
        self.ledger.list(filter).await
    }

    pub async fn get_request(&self, id: Uuid) -> Result<ApprovalRequest, AppError> {
        self.ledger.get(id).await
    }

    pub async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        self.audit.list(filter).await.map_err(AppError::Internal)
    }

    // -- ReviewRequest --

    pub async fn review_request(&self, id: Uuid, input: ReviewInput) -> Result<ReviewOutcome, AppError> {
        let reviewer = input.reviewer.trim().to_string();
        if reviewer.is_empty() {
            return Err(self.deny(ANONYMOUS, None, Some(id), AppError::MissingActor).await);
        }
        let decision = match input.decision.parse::<ReviewDecision>() {
            Ok(d) => d,
            Err(e) => return Err(self.deny(&reviewer, None, Some(id), e).await),
        };

        let mutator = ReviewMutator {
            adapters: &self.adapters,
            reviewer: &reviewer,
            decision,
            notes: input.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
            activate_now: input.activate_now,
            billing_reference: input.billing_reference.as_deref(),
            now: self.clock.now(),
        };

        let out = match self
            .ledger
            .transition(id, ApprovalStatus::Pending, &mutator)
            .await
        {
            Ok(out) => out,
            Err(e) => {
                let action_type = self.lookup_action_type(id).await;
                return Err(self.deny(&reviewer, action_type, Some(id), e).await);
            }
        };

        let row = &out.row;
        let verb = match decision {
            ReviewDecision::Approve => AuditVerb::Approve,
            ReviewDecision::Reject => AuditVerb::Reject,
        };
        tracing::info!(
            request_id = %row.id,
            action_type = %row.action_type,
            reviewer = %reviewer,
            status = %row.status,
            "approval reviewed"
        );
        self.metrics.record_transition(row.action_type, verb.as_str());
        self.emit(
            &reviewer,
            row,
            verb,
            json!({ "notes": row.payload.timeline.review_notes }),
        )
        .await;

        if row.status == ApprovalStatus::Executed {
            self.metrics.record_transition(row.action_type, "execute");
            self.emit(&reviewer, row, AuditVerb::Execute, json!({ "activate_now": true }))
                .await;
        }

        Ok(ReviewOutcome {
            request: out.row,
            result: out.result,
        })
    }

    // -- ExecuteRequest --

    pub async fn execute_request(&self, id: Uuid, input: ExecuteInput) -> Result<ExecuteOutcome, AppError> {
        let executor = input.executor.trim().to_string();
        if executor.is_empty() {
            return Err(self.deny(ANONYMOUS, None, Some(id), AppError::MissingActor).await);
        }
        if input.confirmation.trim().is_empty() {
            return Err(self
                .deny(&executor, None, Some(id), AppError::ConfirmationRequired)
                .await);
        }

        let mutator = ExecuteMutator {
            adapters: &self.adapters,
            executor: &executor,
            confirmation: &input.confirmation,
            now: self.clock.now(),
        };

        let out = match self
            .ledger
            .transition(id, ApprovalStatus::Approved, &mutator)
            .await
        {
            Ok(out) => out,
            Err(e) => {
                let action_type = self.lookup_action_type(id).await;
                return Err(self.deny(&executor, action_type, Some(id), e).await);
            }
        };

        let result = out.result.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("execution of {} produced no result", id))
        })?;
        let row = out.row;
        tracing::info!(
            request_id = %row.id,
            action_type = %row.action_type,
            executor = %executor,
            "approval executed"
        );
        self.metrics.record_transition(row.action_type, "execute");
        self.emit(&executor, &row, AuditVerb::Execute, execution_metadata(&row.payload))
            .await;

        Ok(ExecuteOutcome {
            request: row,
            result,
        })
    }

    // -- helpers --

    async fn lookup_action_type(&self, id: Uuid) -> Option<ActionType> {
        self.ledger.get(id).await.ok().map(|r| r.action_type)
    }

    async fn emit(
        &self,
        actor: &str,
        row: &ApprovalRequest,
        verb: AuditVerb,
        extra: Value,
    ) {
        let mut metadata = json!({
            "target_key": row.target_key,
            "status": row.status,
        });
        if let (Some(meta), Value::Object(extra)) = (metadata.as_object_mut(), extra) {
            meta.extend(extra);
        }
        let entry = AuditEntry::new(
            actor,
            Some(row.action_type),
            verb,
            Some(row.id),
            metadata,
            self.clock.now(),
        );
        audit::record(self.audit.as_ref(), entry).await;
    }

    /// Audit and count a refused call, then hand the error back.
    async fn deny(
        &self,
        actor: &str,
        action_type: Option<ActionType>,
        resource_id: Option<Uuid>,
        err: AppError,
    ) -> AppError {
        if err.is_infrastructure() {
            tracing::error!(?resource_id, "approval workflow failed: {}", err);
            return err;
        }
        if matches!(err, AppError::Downstream(_)) {
            tracing::error!(?resource_id, action_type = ?action_type, "side effect failed: {}", err);
        } else {
            tracing::warn!(
                ?resource_id,
                action_type = ?action_type,
                actor,
                code = err.code(),
                "approval guard refused call"
            );
        }
        self.metrics.record_rejection(action_type, err.code());

        let mut metadata = json!({
            "code": err.code(),
            "message": err.to_string(),
        });
        if let AppError::CooldownActive { execute_after } = &err {
            metadata["execute_after"] = json!(execute_after);
        }
        let entry = AuditEntry::new(
            actor,
            action_type,
            AuditVerb::Denied,
            resource_id,
            metadata,
            self.clock.now(),
        );
        audit::record(self.audit.as_ref(), entry).await;
        err
    }
}

fn parse_create_body(requested_by: &str, mut body: Value) -> Result<CreateRequest, AppError> {
    let action_type = match body.get("action_type") {
        None | Some(Value::Null) => {
            return Err(AppError::InvalidPayload("action_type is required".into()))
        }
        Some(Value::String(s)) => s.parse::<ActionType>()?,
        Some(_) => {
            return Err(AppError::InvalidPayload("action_type must be a string".into()))
        }
    };
    let reason = match body.get("reason") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(AppError::InvalidPayload("reason must be a string".into())),
    };
    body["action_type"] = Value::String(action_type.as_str().to_string());
    let params: CreateParams =
        serde_json::from_value(body).map_err(|e| AppError::InvalidPayload(e.to_string()))?;
    Ok(CreateRequest {
        requested_by: requested_by.to_string(),
        reason,
        params,
    })
}

fn same_actor(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn execution_metadata(payload: &ApprovalPayload) -> Value {
    match &payload.details {
        ActionDetails::SecretRotation(d) => json!({
            "secret_name": d.secret_name,
            "generated_fingerprint": d.generated_fingerprint,
        }),
        ActionDetails::TenantDeletion(d) => json!({
            "tenant_id": d.tenant_id,
            "lifecycle_status": d.lifecycle_status,
        }),
        ActionDetails::AddonActivation(d) => json!({
            "tenant_id": d.tenant_id,
            "addon_id": d.addon_id,
            "billing_reference": d.billing_reference,
        }),
    }
}

// ── Mutators ───────────────────────────────────────────────────

struct ReviewMutator<'a> {
    adapters: &'a Adapters,
    reviewer: &'a str,
    decision: ReviewDecision,
    notes: Option<&'a str>,
    activate_now: bool,
    billing_reference: Option<&'a str>,
    now: DateTime<Utc>,
}

#[async_trait]
impl<'a> Mutator for ReviewMutator<'a> {
    async fn mutate(
        &self,
        mut row: ApprovalRequest,
        effects: &dyn SideEffects,
    ) -> Result<Transitioned, AppError> {
        if self.decision == ReviewDecision::Approve && same_actor(&row.requested_by, self.reviewer) {
            return Err(AppError::SelfApproval);
        }
        if self.activate_now && row.action_type != ActionType::AddonActivation {
            return Err(AppError::InvalidPayload(format!(
                "activate_now is not supported for {}",
                row.action_type
            )));
        }

        row.approved_by = Some(self.reviewer.to_string());
        row.approved_at = Some(self.now);
        row.payload.timeline.reviewed_at = Some(self.now);
        row.payload.timeline.review_notes = self.notes.map(str::to_string);
        if let ActionDetails::AddonActivation(d) = &mut row.payload.details {
            AddonActivation::apply_billing_reference(d, self.billing_reference);
        }

        if self.decision == ReviewDecision::Reject {
            row.status = ApprovalStatus::Rejected;
            return Ok(Transitioned { row, result: None });
        }

        row.status = ApprovalStatus::Approved;
        row.payload.timeline.approved_at = Some(self.now);
        row.expires_at = self.adapters.on_approve(&mut row.payload.details, self.now)?;

        if !self.activate_now {
            return Ok(Transitioned { row, result: None });
        }

        let ctx = ExecutionContext {
            actor: self.reviewer,
            now: self.now,
            effects,
        };
        let result = self.adapters.execute(&mut row.payload.details, &ctx).await?;
        row.status = ApprovalStatus::Executed;
        row.payload.timeline.executed_at = Some(self.now);
        row.payload.timeline.executed_by = Some(self.reviewer.to_string());
        Ok(Transitioned {
            row,
            result: Some(result),
        })
    }
}

struct ExecuteMutator<'a> {
    adapters: &'a Adapters,
    executor: &'a str,
    confirmation: &'a str,
    now: DateTime<Utc>,
}

#[async_trait]
impl<'a> Mutator for ExecuteMutator<'a> {
    async fn mutate(
        &self,
        mut row: ApprovalRequest,
        effects: &dyn SideEffects,
    ) -> Result<Transitioned, AppError> {
        if self.adapters.has_cooldown(&row.payload.details) {
            let execute_after = row.expires_at.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "approved request {} has no execute-after marker",
                    row.id
                ))
            })?;
            if self.now < execute_after {
                return Err(AppError::CooldownActive { execute_after });
            }
        }

        if self.confirmation != self.adapters.confirmation_phrase(&row.payload.details) {
            return Err(AppError::InvalidConfirmation);
        }

        let ctx = ExecutionContext {
            actor: self.executor,
            now: self.now,
            effects,
        };
        let result = self.adapters.execute(&mut row.payload.details, &ctx).await?;
        row.status = ApprovalStatus::Executed;
        row.payload.timeline.executed_at = Some(self.now);
        row.payload.timeline.executed_by = Some(self.executor.to_string());
        Ok(Transitioned {
            row,
            result: Some(result),
        })
    }
}
