//! Postgres ledger tests. Need a disposable database:
//!
//!     DATABASE_URL=postgres://localhost/gatekeeper_test cargo test --test postgres -- --ignored

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use gatekeeper::actions::{
    AddonActivationParams, CreateParams, DeletionPolicy, PluginConfig, TenantDeletionParams,
};
use gatekeeper::build_service;
use gatekeeper::errors::AppError;
use gatekeeper::models::approval::ApprovalStatus;
use gatekeeper::store::postgres::DbSettings;
use gatekeeper::store::PgStore;
use gatekeeper::workflow::{ApprovalService, CreateRequest, ExecuteInput, ManualClock, ReviewInput};

struct PgHarness {
    store: Arc<PgStore>,
    clock: Arc<ManualClock>,
    service: Arc<ApprovalService>,
}

async fn pg_harness() -> Option<PgHarness> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let store = Arc::new(PgStore::connect(&url, &DbSettings::default()).await.unwrap());
    store.migrate().await.unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = build_service(store.clone(), clock.clone(), DeletionPolicy::default()).unwrap();
    Some(PgHarness {
        store,
        clock,
        service: Arc::new(service),
    })
}

async fn insert_tenant(store: &PgStore) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("fixture-{}", id))
        .execute(store.pool())
        .await
        .unwrap();
    id
}

fn deletion(tenant: Uuid, cooldown_hours: Option<i64>) -> CreateRequest {
    CreateRequest {
        requested_by: "ops-lead".into(),
        reason: "contract terminated".into(),
        params: CreateParams::TenantDeletion(TenantDeletionParams {
            tenant_id: tenant.to_string(),
            cooldown_hours,
        }),
    }
}

fn approve_by(reviewer: &str) -> ReviewInput {
    ReviewInput {
        reviewer: reviewer.into(),
        decision: "approve".into(),
        ..Default::default()
    }
}

fn confirm(phrase: String) -> ExecuteInput {
    ExecuteInput {
        executor: "security-officer".into(),
        confirmation: phrase,
    }
}

#[tokio::test]
#[ignore]
async fn test_pg_deletion_closes_tenant() {
    let Some(h) = pg_harness().await else { return };
    let tenant = insert_tenant(&h.store).await;

    let row = h.service.create_request(deletion(tenant, Some(1))).await.unwrap();
    let err = h
        .service
        .create_request(deletion(tenant, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateInFlight { .. }));

    h.service
        .review_request(row.id, approve_by("security-officer"))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(1));
    let out = h
        .service
        .execute_request(row.id, confirm(format!("DELETE {}", tenant)))
        .await
        .unwrap();
    assert_eq!(out.request.status, ApprovalStatus::Executed);

    let is_active: bool = sqlx::query_scalar("SELECT is_active FROM tenants WHERE id = $1")
        .bind(tenant)
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    assert!(!is_active);
    let status: String =
        sqlx::query_scalar("SELECT status FROM tenant_subscriptions WHERE tenant_id = $1")
            .bind(tenant)
            .fetch_one(h.store.pool())
            .await
            .unwrap();
    assert_eq!(status, "closed");

    // Terminal row frees the target.
    h.service.create_request(deletion(tenant, None)).await.unwrap();
}

/// A failing side effect rolls back with the ledger row.
#[tokio::test]
#[ignore]
async fn test_pg_failed_side_effect_leaves_row_approved() {
    let Some(h) = pg_harness().await else { return };
    // No tenants row: the close fails inside the ledger transaction.
    let tenant = Uuid::new_v4();

    let row = h.service.create_request(deletion(tenant, Some(1))).await.unwrap();
    h.service
        .review_request(row.id, approve_by("security-officer"))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(1));
    let err = h
        .service
        .execute_request(row.id, confirm(format!("DELETE {}", tenant)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Downstream(_)));

    let stored = h.service.get_request(row.id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Approved);
    let subscriptions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tenant_subscriptions WHERE tenant_id = $1")
            .bind(tenant)
            .fetch_one(h.store.pool())
            .await
            .unwrap();
    assert_eq!(subscriptions, 0);
}

#[tokio::test]
#[ignore]
async fn test_pg_addon_activation_writes_plugin_config() {
    let Some(h) = pg_harness().await else { return };
    let tenant = insert_tenant(&h.store).await;
    let mut settings = Map::new();
    settings.insert("sender_id".into(), Value::String("SCHOOL".into()));
    let request = CreateRequest {
        requested_by: "ops-lead".into(),
        reason: "sales deal".into(),
        params: CreateParams::AddonActivation(AddonActivationParams {
            tenant_id: tenant.to_string(),
            addon_id: "notifications_sms".into(),
            billing_reference: Some("PO-7".into()),
            settings: Some(settings),
        }),
    };

    let row = h.service.create_request(request.clone()).await.unwrap();
    let out = h
        .service
        .review_request(
            row.id,
            ReviewInput {
                activate_now: true,
                ..approve_by("security-officer")
            },
        )
        .await
        .unwrap();
    assert_eq!(out.request.status, ApprovalStatus::Executed);

    let plugin: Value = sqlx::query_scalar("SELECT config -> 'plugins' -> $2 FROM tenants WHERE id = $1")
        .bind(tenant)
        .bind("notifications_sms")
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    assert_eq!(
        plugin,
        json!({ "enabled": true, "settings": { "sender_id": "SCHOOL" } })
    );
    assert!(h.store.is_enabled(tenant, "notifications_sms").await.unwrap());

    let err = h.service.create_request(request).await.unwrap_err();
    assert!(matches!(err, AppError::AddonAlreadyActive { .. }));
}

/// Row locks serialize racing reviews.
#[tokio::test]
#[ignore]
async fn test_pg_concurrent_reviews_decide_once() {
    let Some(h) = pg_harness().await else { return };
    let id = h
        .service
        .create_request(deletion(Uuid::new_v4(), None))
        .await
        .unwrap()
        .id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .review_request(id, approve_by(&format!("reviewer-{}", i)))
                .await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(AppError::NotPending) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(ok, 1);
}
