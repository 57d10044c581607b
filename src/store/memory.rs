//! In-process backend for tests and `serve --in-memory`.
//!
//! Every ledger write takes the same async mutex and holds it for the whole
//! transition, so concurrent callers observe the same serialization a row lock
//! gives in Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{check_transition, Ledger, Mutator, Transitioned};
use crate::actions::{PluginConfig, TenantLifecycle};
use crate::audit::{AuditFilter, AuditSink};
use crate::errors::AppError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus, ListFilter, NewApproval};
use crate::models::audit::AuditEntry;

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<ApprovalRequest>>,
    audit: Mutex<Vec<AuditEntry>>,
    closed_tenants: Mutex<HashSet<Uuid>>,
    plugins: Mutex<HashMap<(Uuid, String), Map<String, Value>>>,
    fail_side_effects: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make tenant close and add-on enable fail until switched back.
    pub fn fail_side_effects(&self, fail: bool) {
        self.fail_side_effects.store(fail, Ordering::SeqCst);
    }

    pub async fn is_tenant_closed(&self, tenant_id: Uuid) -> bool {
        self.closed_tenants.lock().await.contains(&tenant_id)
    }

    pub async fn plugin_settings(
        &self,
        tenant_id: Uuid,
        addon_id: &str,
    ) -> Option<Map<String, Value>> {
        self.plugins
            .lock()
            .await
            .get(&(tenant_id, addon_id.to_string()))
            .cloned()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().await.clone()
    }

    fn check_side_effects(&self) -> anyhow::Result<()> {
        if self.fail_side_effects.load(Ordering::SeqCst) {
            anyhow::bail!("side effects disabled");
        }
        Ok(())
    }
}

// -- Ledger --

#[async_trait]
impl Ledger for MemoryStore {
    async fn insert(&self, new: NewApproval) -> Result<ApprovalRequest, AppError> {
        let mut rows = self.rows.lock().await;
        let in_flight = rows.iter().any(|r| {
            r.action_type == new.action_type
                && r.target_key == new.target_key
                && r.status.is_active()
        });
        if in_flight {
            return Err(AppError::DuplicateInFlight {
                action_type: new.action_type,
                target_key: new.target_key,
            });
        }
        let row = new.into_request(Uuid::new_v4());
        rows.push(row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<ApprovalRequest, AppError> {
        self.rows
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(AppError::NotFound(id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ApprovalRequest>, AppError> {
        let rows = self.rows.lock().await;
        // Insertion order breaks ties between equal timestamps.
        let mut matching: Vec<(usize, &ApprovalRequest)> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.matches(r))
            .collect();
        matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        mutator: &dyn Mutator,
    ) -> Result<Transitioned, AppError> {
        let mut rows = self.rows.lock().await;
        let slot = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound(id))?;
        if slot.status != expected {
            return Err(expected.mismatch(slot.status));
        }

        let out = mutator.mutate(slot.clone(), self).await?;
        check_transition(slot, &out.row)?;
        *slot = out.row.clone();
        Ok(out)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

// -- Audit --

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> anyhow::Result<Vec<AuditEntry>> {
        let audit = self.audit.lock().await;
        Ok(audit
            .iter()
            .rev()
            .filter(|e| filter.resource_id.map_or(true, |id| e.resource_id == Some(id)))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }
}

// -- Tenant collaborators --

#[async_trait]
impl TenantLifecycle for MemoryStore {
    async fn close_tenant(&self, tenant_id: Uuid, actor: &str) -> anyhow::Result<()> {
        self.check_side_effects()?;
        self.closed_tenants.lock().await.insert(tenant_id);
        tracing::info!(%tenant_id, actor, "tenant closed");
        Ok(())
    }
}

#[async_trait]
impl PluginConfig for MemoryStore {
    async fn is_enabled(&self, tenant_id: Uuid, addon_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .plugins
            .lock()
            .await
            .contains_key(&(tenant_id, addon_id.to_string())))
    }

    async fn enable(
        &self,
        tenant_id: Uuid,
        addon_id: &str,
        settings: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.check_side_effects()?;
        self.plugins
            .lock()
            .await
            .insert((tenant_id, addon_id.to_string()), settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::SideEffects;
    use crate::models::approval::ActionType;
    use crate::models::payload::{ActionDetails, ApprovalPayload, SecretRotationDetails};
    use chrono::{Duration, Utc};

    fn new_approval(target: &str, offset_secs: i64) -> NewApproval {
        let at = Utc::now() + Duration::seconds(offset_secs);
        NewApproval {
            action_type: ActionType::SecretRotation,
            target_key: target.into(),
            payload: ApprovalPayload::new(
                ActionDetails::SecretRotation(SecretRotationDetails {
                    secret_name: target.into(),
                    env_var: "JWT_SECRETS".into(),
                    generated_format: None,
                    generated_fingerprint: None,
                }),
                "r".into(),
                at,
            ),
            requested_by: "ops-1".into(),
            reason: "r".into(),
            created_at: at,
        }
    }

    struct Reject;

    #[async_trait]
    impl Mutator for Reject {
        async fn mutate(
            &self,
            mut current: ApprovalRequest,
            _effects: &dyn SideEffects,
        ) -> Result<Transitioned, AppError> {
            current.status = ApprovalStatus::Rejected;
            current.approved_by = Some("ops-2".into());
            Ok(Transitioned {
                row: current,
                result: None,
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl Mutator for Failing {
        async fn mutate(
            &self,
            _current: ApprovalRequest,
            _effects: &dyn SideEffects,
        ) -> Result<Transitioned, AppError> {
            Err(AppError::Downstream("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_until_terminal() {
        let store = MemoryStore::new();
        let first = store.insert(new_approval("jwt", 0)).await.unwrap();
        let err = store.insert(new_approval("jwt", 1)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateInFlight { .. }));

        store
            .transition(first.id, ApprovalStatus::Pending, &Reject)
            .await
            .unwrap();
        assert!(store.insert(new_approval("jwt", 2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_mutator_leaves_row_untouched() {
        let store = MemoryStore::new();
        let row = store.insert(new_approval("jwt", 0)).await.unwrap();
        let err = store
            .transition(row.id, ApprovalStatus::Pending, &Failing)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Downstream(_)));
        assert_eq!(store.get(row.id).await.unwrap().status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_mismatch() {
        let store = MemoryStore::new();
        let row = store.insert(new_approval("jwt", 0)).await.unwrap();
        let err = store
            .transition(row.id, ApprovalStatus::Approved, &Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotApproved));

        let missing = store
            .transition(Uuid::new_v4(), ApprovalStatus::Pending, &Reject)
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let store = MemoryStore::new();
        let a = store.insert(new_approval("jwt", 0)).await.unwrap();
        let b = store.insert(new_approval("data_encryption", 10)).await.unwrap();

        let all = Ledger::list(&store, &ListFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );

        let page = Ledger::list(&store, &ListFilter::new(Some(1), Some(1)))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, a.id);

        let mut filtered = ListFilter::default();
        filtered.target_key = Some("jwt".into());
        let only = Ledger::list(&store, &filtered).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, a.id);
    }
}
