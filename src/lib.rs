//! Gatekeeper: two-person approval workflow for sensitive platform actions.
//!
//! Re-exports modules needed by the binary and by integration tests in `tests/`.

pub mod actions;
pub mod api;
pub mod audit;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod store;
pub mod workflow;

use std::sync::Arc;

use actions::{Adapters, DeletionPolicy, PluginConfig};
use audit::AuditSink;
use metrics::WorkflowMetrics;
use store::Ledger;
use workflow::{ApprovalService, Clock};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub service: Arc<ApprovalService>,
    pub admin_key: String,
}

/// Wire the workflow over one backend that also serves audit and the add-on lookup.
/// Execution-time side effects come from the ledger's own transaction.
pub fn build_service<B>(
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    deletion: DeletionPolicy,
) -> anyhow::Result<ApprovalService>
where
    B: Ledger + AuditSink + PluginConfig + 'static,
{
    let adapters = Adapters::new(backend.clone(), deletion);
    Ok(ApprovalService::new(
        backend.clone(),
        Arc::new(adapters),
        backend,
        clock,
        WorkflowMetrics::new()?,
    ))
}
