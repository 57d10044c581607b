use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{check_transition, Ledger, Mutator, Transitioned};
use crate::actions::{PluginConfig, TenantLifecycle};
use crate::audit::{AuditFilter, AuditSink};
use crate::errors::AppError;
use crate::models::approval::{
    ActionType, ApprovalRequest, ApprovalStatus, ListFilter, NewApproval,
};
use crate::models::audit::AuditEntry;
use crate::models::payload::ApprovalPayload;

/// Partial unique index over in-flight rows; see migrations.
const ACTIVE_TARGET_INDEX: &str = "approval_requests_active_target_idx";

const APPROVAL_COLUMNS: &str = "id, action_type, target_key, payload, status, requested_by, \
     approved_by, reason, created_at, approved_at, expires_at";

/// Pool sizing and per-transaction timeouts.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout_ms: u64,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgStore {
    pub async fn connect(database_url: &str, settings: &DbSettings) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            statement_timeout_ms: settings.statement_timeout_ms,
        })
    }

    /// Raw pool for tenant fixtures and maintenance queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        let mut tx = self.pool.begin().await?;
        let timeout = format!("{}ms", self.statement_timeout_ms);
        sqlx::query(
            "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $1, true)",
        )
        .bind(&timeout)
        .execute(&mut *tx)
        .await?;
        Ok(tx)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ApprovalRow {
    pub id: Uuid,
    pub action_type: ActionType,
    pub target_key: String,
    pub payload: Value,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApprovalRow> for ApprovalRequest {
    type Error = AppError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        Ok(ApprovalRequest {
            id: row.id,
            action_type: row.action_type,
            target_key: row.target_key,
            payload: ApprovalPayload::from_json(row.action_type, row.payload)?,
            status: row.status,
            requested_by: row.requested_by,
            approved_by: row.approved_by,
            reason: row.reason,
            created_at: row.created_at,
            approved_at: row.approved_at,
            expires_at: row.expires_at,
        })
    }
}

fn payload_json(payload: &ApprovalPayload) -> Result<Value, AppError> {
    payload
        .to_json()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("payload serialization failed: {}", e)))
}

// -- Approval Ledger Operations --

#[async_trait]
impl Ledger for PgStore {
    async fn insert(&self, new: NewApproval) -> Result<ApprovalRequest, AppError> {
        let payload = payload_json(&new.payload)?;
        let row = sqlx::query_as::<_, ApprovalRow>(&format!(
            r#"INSERT INTO approval_requests
                   (id, action_type, target_key, payload, status, requested_by, reason, created_at)
               VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
               RETURNING {APPROVAL_COLUMNS}"#
        ))
        .bind(Uuid::new_v4())
        .bind(new.action_type)
        .bind(&new.target_key)
        .bind(&payload)
        .bind(&new.requested_by)
        .bind(&new.reason)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = matches!(
                &e,
                sqlx::Error::Database(db) if db.constraint() == Some(ACTIVE_TARGET_INDEX)
            );
            if duplicate {
                AppError::DuplicateInFlight {
                    action_type: new.action_type,
                    target_key: new.target_key.clone(),
                }
            } else {
                AppError::Database(e)
            }
        })?;
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<ApprovalRequest, AppError> {
        let row = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(AppError::NotFound(id))?.try_into()
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<ApprovalRequest>, AppError> {
        let rows = sqlx::query_as::<_, ApprovalRow>(&format!(
            r#"SELECT {APPROVAL_COLUMNS} FROM approval_requests
               WHERE ($1::varchar IS NULL OR action_type = $1)
                 AND ($2::text IS NULL OR target_key = $2)
                 AND ($3::varchar IS NULL OR status = $3)
               ORDER BY created_at DESC, id DESC
               LIMIT $4 OFFSET $5"#
        ))
        .bind(filter.action_type)
        .bind(filter.target_key.as_deref())
        .bind(filter.status)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ApprovalRequest::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ApprovalStatus,
        mutator: &dyn Mutator,
    ) -> Result<Transitioned, AppError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query_as::<_, ApprovalRow>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let current: ApprovalRequest = row.ok_or(AppError::NotFound(id))?.try_into()?;
        if current.status != expected {
            return Err(expected.mismatch(current.status));
        }

        // Dropping `tx` on any error below rolls back the row and the side effects.
        let out = {
            let effects = PgTxEffects::new(&mut *tx);
            mutator.mutate(current.clone(), &effects).await?
        };
        check_transition(&current, &out.row)?;

        let next = &out.row;
        sqlx::query(
            r#"UPDATE approval_requests
               SET status = $2, approved_by = $3, approved_at = $4, expires_at = $5, payload = $6
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(next.status)
        .bind(&next.approved_by)
        .bind(next.approved_at)
        .bind(next.expires_at)
        .bind(payload_json(&next.payload)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(out)
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// -- Audit Operations --

#[async_trait]
impl AuditSink for PgStore {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO platform_audit_logs
                   (id, created_at, actor_id, action, resource_type, resource_id, outcome, metadata)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.id)
        .bind(entry.created_at)
        .bind(&entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id)
        .bind(entry.outcome)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            r#"SELECT id, created_at, actor_id, action, resource_type, resource_id, outcome, metadata
               FROM platform_audit_logs
               WHERE ($1::uuid IS NULL OR resource_id = $1)
               ORDER BY created_at DESC, id DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(filter.resource_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// -- Side Effects --

/// Tenant writes issued on the ledger's open transaction.
pub struct PgTxEffects<'c> {
    conn: Mutex<&'c mut PgConnection>,
}

impl<'c> PgTxEffects<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl<'c> TenantLifecycle for PgTxEffects<'c> {
    async fn close_tenant(&self, tenant_id: Uuid, actor: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;
        close_tenant_on(&mut **conn, tenant_id, actor).await
    }
}

#[async_trait]
impl<'c> PluginConfig for PgTxEffects<'c> {
    async fn is_enabled(&self, tenant_id: Uuid, addon_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.lock().await;
        is_enabled_on(&mut **conn, tenant_id, addon_id).await
    }

    async fn enable(
        &self,
        tenant_id: Uuid,
        addon_id: &str,
        settings: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;
        enable_on(&mut **conn, tenant_id, addon_id, settings).await
    }
}

/// Pool-level lookups for create-time checks, outside any ledger transaction.
#[async_trait]
impl PluginConfig for PgStore {
    async fn is_enabled(&self, tenant_id: Uuid, addon_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.pool.acquire().await?;
        is_enabled_on(&mut *conn, tenant_id, addon_id).await
    }

    async fn enable(
        &self,
        tenant_id: Uuid,
        addon_id: &str,
        settings: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        enable_on(&mut *conn, tenant_id, addon_id, settings).await
    }
}

async fn close_tenant_on(conn: &mut PgConnection, tenant_id: Uuid, actor: &str) -> anyhow::Result<()> {
    let result = sqlx::query("UPDATE tenants SET is_active = false, updated_at = NOW() WHERE id = $1")
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        anyhow::bail!("tenant {} not found", tenant_id);
    }

    sqlx::query(
        r#"INSERT INTO tenant_subscriptions (tenant_id, status, updated_by, updated_at)
           VALUES ($1, 'closed', $2, NOW())
           ON CONFLICT (tenant_id)
           DO UPDATE SET status = 'closed', updated_by = EXCLUDED.updated_by, updated_at = NOW()"#,
    )
    .bind(tenant_id)
    .bind(actor)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn is_enabled_on(conn: &mut PgConnection, tenant_id: Uuid, addon_id: &str) -> anyhow::Result<bool> {
    let enabled = sqlx::query_scalar::<_, bool>(
        r#"SELECT COALESCE((config -> 'plugins' -> $2 ->> 'enabled')::boolean, false)
           FROM tenants WHERE id = $1"#,
    )
    .bind(tenant_id)
    .bind(addon_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(enabled.unwrap_or(false))
}

async fn enable_on(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    addon_id: &str,
    settings: &Map<String, Value>,
) -> anyhow::Result<()> {
    let entry = json!({ "enabled": true, "settings": settings });
    let result = sqlx::query(
        r#"UPDATE tenants
           SET config = jsonb_set(
                   jsonb_set(COALESCE(config, '{}'::jsonb), '{plugins}',
                             COALESCE(config -> 'plugins', '{}'::jsonb), true),
                   ARRAY['plugins', $2]::text[], $3::jsonb, true),
               updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(tenant_id)
    .bind(addon_id)
    .bind(&entry)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        anyhow::bail!("tenant {} not found", tenant_id);
    }
    Ok(())
}
