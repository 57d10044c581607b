//! Action adapters: the per-action rules plugged into the shared lifecycle.

pub mod addon_activation;
pub mod secret_rotation;
pub mod tenant_deletion;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::errors::AppError;
use crate::models::approval::ActionType;
use crate::models::payload::ActionDetails;

pub use addon_activation::{AddonActivation, AddonActivationParams};
pub use secret_rotation::{SecretRotation, SecretRotationParams};
pub use tenant_deletion::{DeletionPolicy, TenantDeletion, TenantDeletionParams};

// ── Collaborators ──────────────────────────────────────────────

/// Soft-closes tenants. Backed by the tenant tables in production.
#[async_trait]
pub trait TenantLifecycle: Send + Sync {
    async fn close_tenant(&self, tenant_id: Uuid, actor: &str) -> anyhow::Result<()>;
}

/// Per-tenant add-on switches.
#[async_trait]
pub trait PluginConfig: Send + Sync {
    async fn is_enabled(&self, tenant_id: Uuid, addon_id: &str) -> anyhow::Result<bool>;

    async fn enable(
        &self,
        tenant_id: Uuid,
        addon_id: &str,
        settings: &Map<String, Value>,
    ) -> anyhow::Result<()>;
}

/// Everything an executing action may touch. The ledger hands one of these to
/// the mutator so side effects commit or roll back with the row.
pub trait SideEffects: TenantLifecycle + PluginConfig {}

impl<T: TenantLifecycle + PluginConfig + ?Sized> SideEffects for T {}

// ── Adapter contract ───────────────────────────────────────────

/// Who is executing, when, and through which collaborators.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub actor: &'a str,
    pub now: DateTime<Utc>,
    pub effects: &'a dyn SideEffects,
}

#[async_trait]
pub trait Action: Send + Sync {
    type Params: Send + 'static;
    type Details: Send + Sync;

    /// Validate creation input and build the stored details.
    async fn validate_create(&self, params: Self::Params) -> Result<Self::Details, AppError>;

    /// Key that at most one in-flight request may hold.
    fn target_key(&self, details: &Self::Details) -> String;

    /// Exact phrase the executor must type.
    fn confirmation_phrase(&self, details: &Self::Details) -> String;

    /// Delay between approval and the earliest execution, if this action has one.
    fn cooldown(&self, _details: &Self::Details) -> Option<Duration> {
        None
    }

    /// Runs on approval; returns the execute-after marker for cooldown actions.
    fn on_approve(
        &self,
        details: &mut Self::Details,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        match self.cooldown(details) {
            Some(cooldown) => execute_after(now, cooldown).map(Some),
            None => Ok(None),
        }
    }

    /// Perform the side effect, recording outcome fields into `details`.
    async fn execute(
        &self,
        details: &mut Self::Details,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionResult, AppError>;
}

/// `now + cooldown`, refusing timestamps chrono cannot represent.
pub(crate) fn execute_after(now: DateTime<Utc>, cooldown: Duration) -> Result<DateTime<Utc>, AppError> {
    now.checked_add_signed(cooldown).ok_or_else(|| {
        AppError::InvalidPayload(format!(
            "cooldown of {}h from {} is out of range",
            cooldown.num_hours(),
            now
        ))
    })
}

// ── Creation input ─────────────────────────────────────────────

/// Action-specific creation input, tagged by `action_type` on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum CreateParams {
    SecretRotation(SecretRotationParams),
    TenantDeletion(TenantDeletionParams),
    AddonActivation(AddonActivationParams),
}

impl CreateParams {
    pub fn action_type(&self) -> ActionType {
        match self {
            CreateParams::SecretRotation(_) => ActionType::SecretRotation,
            CreateParams::TenantDeletion(_) => ActionType::TenantDeletion,
            CreateParams::AddonActivation(_) => ActionType::AddonActivation,
        }
    }
}

// ── Execution output ───────────────────────────────────────────

/// Secret material shown to the executor once. Redacted in `Debug`, wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct RevealedSecret(String);

impl RevealedSecret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevealedSecret(***)")
    }
}

impl Serialize for RevealedSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl Drop for RevealedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Per-call result of a side effect. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    SecretRotated {
        secret_name: String,
        env_var: String,
        generated_format: String,
        generated_secret: RevealedSecret,
        fingerprint: String,
        instructions: Vec<String>,
    },
    TenantClosed {
        tenant_id: Uuid,
        lifecycle_status: String,
    },
    AddonActivated {
        tenant_id: Uuid,
        addon_id: String,
        addon_name: String,
        activated_at: DateTime<Utc>,
    },
}

// ── Registry ───────────────────────────────────────────────────

/// The closed set of adapters, dispatched by `ActionType`.
pub struct Adapters {
    pub secret_rotation: SecretRotation,
    pub tenant_deletion: TenantDeletion,
    pub addon_activation: AddonActivation,
}

/// What the engine needs to open a ledger row.
#[derive(Debug, Clone)]
pub struct PreparedAction {
    pub action_type: ActionType,
    pub target_key: String,
    pub details: ActionDetails,
}

impl Adapters {
    /// `plugins` serves the create-time lookup; execution goes through the
    /// ledger's `SideEffects`.
    pub fn new(plugins: Arc<dyn PluginConfig>, deletion: DeletionPolicy) -> Self {
        Self {
            secret_rotation: SecretRotation,
            tenant_deletion: TenantDeletion::new(deletion),
            addon_activation: AddonActivation::new(plugins),
        }
    }

    pub async fn prepare(&self, params: CreateParams) -> Result<PreparedAction, AppError> {
        let action_type = params.action_type();
        let (target_key, details) = match params {
            CreateParams::SecretRotation(p) => {
                let d = self.secret_rotation.validate_create(p).await?;
                (self.secret_rotation.target_key(&d), ActionDetails::SecretRotation(d))
            }
            CreateParams::TenantDeletion(p) => {
                let d = self.tenant_deletion.validate_create(p).await?;
                (self.tenant_deletion.target_key(&d), ActionDetails::TenantDeletion(d))
            }
            CreateParams::AddonActivation(p) => {
                let d = self.addon_activation.validate_create(p).await?;
                (self.addon_activation.target_key(&d), ActionDetails::AddonActivation(d))
            }
        };
        Ok(PreparedAction {
            action_type,
            target_key,
            details,
        })
    }

    pub fn confirmation_phrase(&self, details: &ActionDetails) -> String {
        match details {
            ActionDetails::SecretRotation(d) => self.secret_rotation.confirmation_phrase(d),
            ActionDetails::TenantDeletion(d) => self.tenant_deletion.confirmation_phrase(d),
            ActionDetails::AddonActivation(d) => self.addon_activation.confirmation_phrase(d),
        }
    }

    pub fn on_approve(
        &self,
        details: &mut ActionDetails,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        match details {
            ActionDetails::SecretRotation(d) => self.secret_rotation.on_approve(d, now),
            ActionDetails::TenantDeletion(d) => self.tenant_deletion.on_approve(d, now),
            ActionDetails::AddonActivation(d) => self.addon_activation.on_approve(d, now),
        }
    }

    /// True when the action defines a cooldown at all.
    pub fn has_cooldown(&self, details: &ActionDetails) -> bool {
        match details {
            ActionDetails::SecretRotation(d) => self.secret_rotation.cooldown(d).is_some(),
            ActionDetails::TenantDeletion(d) => self.tenant_deletion.cooldown(d).is_some(),
            ActionDetails::AddonActivation(d) => self.addon_activation.cooldown(d).is_some(),
        }
    }

    pub async fn execute(
        &self,
        details: &mut ActionDetails,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionResult, AppError> {
        match details {
            ActionDetails::SecretRotation(d) => self.secret_rotation.execute(d, ctx).await,
            ActionDetails::TenantDeletion(d) => self.tenant_deletion.execute(d, ctx).await,
            ActionDetails::AddonActivation(d) => self.addon_activation.execute(d, ctx).await,
        }
    }
}

/// Trimmed, non-empty, or `None`.
pub(crate) fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_params_are_tagged_by_action_type() {
        let params: CreateParams = serde_json::from_value(json!({
            "action_type": "secret_rotation",
            "secret_name": "JWT",
            "reason": "ignored here",
        }))
        .unwrap();
        assert_eq!(params.action_type(), ActionType::SecretRotation);

        let bad = serde_json::from_value::<CreateParams>(json!({"action_type": "tenant_nuke"}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_revealed_secret_is_redacted_in_debug() {
        let s = RevealedSecret::new("c2VjcmV0".into());
        assert_eq!(format!("{:?}", s), "RevealedSecret(***)");
        assert_eq!(serde_json::to_value(&s).unwrap(), json!("c2VjcmV0"));
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ref-1 ")), Some("ref-1".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
