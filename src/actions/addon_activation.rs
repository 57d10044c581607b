use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::tenant_deletion::parse_tenant_id;
use super::{non_blank, Action, ExecutionContext, ExecutionResult, PluginConfig};
use crate::errors::AppError;
use crate::models::payload::AddonActivationDetails;

/// An add-on tenants can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddonMeta {
    pub id: &'static str,
    pub name: &'static str,
}

pub const CATALOG: &[AddonMeta] = &[
    AddonMeta {
        id: "payments_razorpay",
        name: "Razorpay Payments",
    },
    AddonMeta {
        id: "notifications_sms",
        name: "SMS Gateway",
    },
    AddonMeta {
        id: "analytics_google",
        name: "Google Analytics",
    },
    AddonMeta {
        id: "ai_suite_v1",
        name: "AI Suite (Practical AI)",
    },
];

pub fn find_addon(addon_id: &str) -> Option<&'static AddonMeta> {
    let id = addon_id.trim();
    CATALOG.iter().find(|a| a.id == id)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddonActivationParams {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub addon_id: String,
    #[serde(default)]
    pub billing_reference: Option<String>,
    #[serde(default)]
    pub settings: Option<Map<String, Value>>,
}

/// Turns on a catalog add-on for one tenant. `plugins` answers the
/// already-enabled check at creation.
pub struct AddonActivation {
    plugins: Arc<dyn PluginConfig>,
}

impl AddonActivation {
    pub fn new(plugins: Arc<dyn PluginConfig>) -> Self {
        Self { plugins }
    }

    /// Reviewers may attach or replace the billing reference.
    pub fn apply_billing_reference(details: &mut AddonActivationDetails, reference: Option<&str>) {
        if let Some(reference) = non_blank(reference) {
            details.billing_reference = Some(reference);
        }
    }
}

#[async_trait]
impl Action for AddonActivation {
    type Params = AddonActivationParams;
    type Details = AddonActivationDetails;

    async fn validate_create(&self, params: Self::Params) -> Result<Self::Details, AppError> {
        let tenant_id = parse_tenant_id(&params.tenant_id)?;
        let addon_id = params.addon_id.trim();
        if addon_id.is_empty() {
            return Err(AppError::InvalidPayload("addon_id is required".into()));
        }
        let meta = find_addon(addon_id).ok_or_else(|| {
            AppError::InvalidPayload(format!("addon_id '{}' is not recognized", addon_id))
        })?;

        let enabled = self
            .plugins
            .is_enabled(tenant_id, meta.id)
            .await
            .map_err(AppError::Internal)?;
        if enabled {
            return Err(AppError::AddonAlreadyActive {
                addon_id: meta.id.to_string(),
            });
        }

        Ok(AddonActivationDetails {
            tenant_id,
            addon_id: meta.id.to_string(),
            addon_name: meta.name.to_string(),
            billing_reference: non_blank(params.billing_reference.as_deref()),
            settings: params.settings.unwrap_or_default(),
            activated_at: None,
        })
    }

    fn target_key(&self, details: &Self::Details) -> String {
        format!("{}:{}", details.tenant_id.hyphenated(), details.addon_id)
    }

    fn confirmation_phrase(&self, details: &Self::Details) -> String {
        format!(
            "ACTIVATE {} FOR {}",
            details.addon_id,
            details.tenant_id.hyphenated()
        )
    }

    async fn execute(
        &self,
        details: &mut Self::Details,
        ctx: &ExecutionContext<'_>,
    ) -> Result<ExecutionResult, AppError> {
        ctx.effects
            .enable(details.tenant_id, &details.addon_id, &details.settings)
            .await
            .map_err(|e| {
                tracing::error!(
                    tenant_id = %details.tenant_id,
                    addon_id = %details.addon_id,
                    "add-on enable failed: {:#}",
                    e
                );
                AppError::Downstream(format!("add-on enable failed: {}", e))
            })?;
        details.activated_at = Some(ctx.now);

        Ok(ExecutionResult::AddonActivated {
            tenant_id: details.tenant_id,
            addon_id: details.addon_id.clone(),
            addon_name: details.addon_name.clone(),
            activated_at: ctx.now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakePlugins {
        enabled: Mutex<HashMap<(Uuid, String), Map<String, Value>>>,
    }

    #[async_trait]
    impl PluginConfig for FakePlugins {
        async fn is_enabled(&self, tenant_id: Uuid, addon_id: &str) -> anyhow::Result<bool> {
            Ok(self
                .enabled
                .lock()
                .unwrap()
                .contains_key(&(tenant_id, addon_id.to_string())))
        }

        async fn enable(
            &self,
            tenant_id: Uuid,
            addon_id: &str,
            settings: &Map<String, Value>,
        ) -> anyhow::Result<()> {
            self.enabled
                .lock()
                .unwrap()
                .insert((tenant_id, addon_id.to_string()), settings.clone());
            Ok(())
        }
    }

    fn params(tenant: Uuid, addon: &str) -> AddonActivationParams {
        AddonActivationParams {
            tenant_id: tenant.to_string(),
            addon_id: addon.into(),
            billing_reference: Some("  ".into()),
            settings: None,
        }
    }

    #[test]
    fn test_catalog_lookup() {
        assert_eq!(find_addon("ai_suite_v1").unwrap().name, "AI Suite (Practical AI)");
        assert_eq!(find_addon(" notifications_sms ").unwrap().name, "SMS Gateway");
        assert!(find_addon("crypto_wallet").is_none());
    }

    #[tokio::test]
    async fn test_unknown_addon_is_invalid_payload() {
        let a = AddonActivation::new(Arc::new(FakePlugins::default()));
        let err = a
            .validate_create(params(Uuid::new_v4(), "crypto_wallet"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_already_enabled_addon_is_rejected() {
        let plugins = Arc::new(FakePlugins::default());
        let tenant = Uuid::new_v4();
        plugins
            .enable(tenant, "payments_razorpay", &Map::new())
            .await
            .unwrap();
        let a = AddonActivation::new(plugins);
        let err = a
            .validate_create(params(tenant, "payments_razorpay"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AddonAlreadyActive { .. }));
    }

    #[tokio::test]
    async fn test_details_and_phrase() {
        let a = AddonActivation::new(Arc::new(FakePlugins::default()));
        let tenant = Uuid::new_v4();
        let mut d = a
            .validate_create(params(tenant, "analytics_google"))
            .await
            .unwrap();
        assert_eq!(d.addon_name, "Google Analytics");
        assert!(d.billing_reference.is_none());
        assert!(d.settings.is_empty());
        assert_eq!(a.target_key(&d), format!("{}:analytics_google", tenant));
        assert_eq!(
            a.confirmation_phrase(&d),
            format!("ACTIVATE analytics_google FOR {}", tenant)
        );

        AddonActivation::apply_billing_reference(&mut d, Some(" INV-42 "));
        assert_eq!(d.billing_reference.as_deref(), Some("INV-42"));
        AddonActivation::apply_billing_reference(&mut d, None);
        assert_eq!(d.billing_reference.as_deref(), Some("INV-42"));
    }

    #[tokio::test]
    async fn test_execute_enables_with_settings() {
        let a = AddonActivation::new(Arc::new(FakePlugins::default()));
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let mut p = params(tenant, "notifications_sms");
        let mut settings = Map::new();
        settings.insert("sender_id".into(), Value::String("SCHOOL".into()));
        p.settings = Some(settings.clone());
        let mut d = a.validate_create(p).await.unwrap();

        let now = Utc::now();
        let ctx = ExecutionContext {
            actor: "ops-2",
            now,
            effects: &store,
        };
        a.execute(&mut d, &ctx).await.unwrap();
        assert_eq!(d.activated_at, Some(now));
        assert_eq!(
            store.plugin_settings(tenant, "notifications_sms").await,
            Some(settings)
        );
    }
}
