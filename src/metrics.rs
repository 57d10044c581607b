//! Prometheus counters for the approval workflow, served at `/metrics`.

use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};

use crate::models::approval::ActionType;

/// Workflow metrics on a registry owned by this recorder.
#[derive(Clone)]
pub struct WorkflowMetrics {
    registry: Registry,
    transitions_total: IntCounterVec,
    rejections_total: IntCounterVec,
}

impl WorkflowMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            opts!(
                "gatekeeper_transitions_total",
                "Approval lifecycle transitions by action type"
            ),
            &["action_type", "transition"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            opts!(
                "gatekeeper_rejections_total",
                "Refused workflow calls by action type and error code"
            ),
            &["action_type", "code"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        Ok(Self {
            registry,
            transitions_total,
            rejections_total,
        })
    }

    /// `transition` is one of `request`, `approve`, `reject`, `execute`.
    pub fn record_transition(&self, action_type: ActionType, transition: &str) {
        self.transitions_total
            .with_label_values(&[action_type.as_str(), transition])
            .inc();
    }

    pub fn record_rejection(&self, action_type: Option<ActionType>, code: &str) {
        let action = action_type.map_or("unknown", |t| t.as_str());
        self.rejections_total
            .with_label_values(&[action, code])
            .inc();
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
