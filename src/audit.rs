use async_trait::async_trait;
use uuid::Uuid;

use crate::models::approval::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::models::audit::AuditEntry;

/// Append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> anyhow::Result<()>;

    /// Newest first.
    async fn list(&self, filter: &AuditFilter) -> anyhow::Result<Vec<AuditEntry>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditFilter {
    pub resource_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl AuditFilter {
    pub fn new(resource_id: Option<Uuid>, limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 && l <= MAX_PAGE_SIZE => l,
            _ => DEFAULT_PAGE_SIZE,
        };
        Self {
            resource_id,
            limit,
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

/// Write an entry, logging instead of failing the caller when the sink errors.
pub async fn record(sink: &dyn AuditSink, entry: AuditEntry) {
    match sink.record(&entry).await {
        Ok(()) => tracing::debug!(action = %entry.action, resource_id = ?entry.resource_id, "audit entry recorded"),
        Err(e) => tracing::error!(
            action = %entry.action,
            resource_id = ?entry.resource_id,
            "failed to write audit entry: {:#}",
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::AuditVerb;
    use chrono::Utc;

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _entry: &AuditEntry) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn list(&self, _filter: &AuditFilter) -> anyhow::Result<Vec<AuditEntry>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        let entry = AuditEntry::new(
            "ops-1",
            None,
            AuditVerb::Denied,
            None,
            serde_json::json!({"code": "invalid_decision"}),
            Utc::now(),
        );
        tokio_test::block_on(record(&BrokenSink, entry));
    }

    #[test]
    fn test_filter_paging() {
        let f = AuditFilter::new(None, Some(1000), Some(-1));
        assert_eq!(f.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(f.offset, 0);
    }
}
