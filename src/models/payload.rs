//! Typed approval payloads.
//!
//! In memory a payload is the adapter's details plus the shared review
//! timeline. At the storage boundary both halves are merged into one flat JSON
//! object so the `payload` column stays readable from SQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::approval::ActionType;
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalPayload {
    pub details: ActionDetails,
    pub timeline: Timeline,
}

/// Review history shared by every action type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub reason: String,
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionDetails {
    SecretRotation(SecretRotationDetails),
    TenantDeletion(TenantDeletionDetails),
    AddonActivation(AddonActivationDetails),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretRotationDetails {
    pub secret_name: String,
    pub env_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_format: Option<String>,
    /// Hex SHA-256 of the raw secret bytes. The secret itself is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantDeletionDetails {
    pub tenant_id: Uuid,
    pub cooldown_hours: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonActivationDetails {
    pub tenant_id: Uuid,
    pub addon_id: String,
    pub addon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_reference: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl ActionDetails {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionDetails::SecretRotation(_) => ActionType::SecretRotation,
            ActionDetails::TenantDeletion(_) => ActionType::TenantDeletion,
            ActionDetails::AddonActivation(_) => ActionType::AddonActivation,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ActionDetails::SecretRotation(d) => serde_json::to_value(d),
            ActionDetails::TenantDeletion(d) => serde_json::to_value(d),
            ActionDetails::AddonActivation(d) => serde_json::to_value(d),
        }
    }

    fn from_value(action_type: ActionType, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match action_type {
            ActionType::SecretRotation => ActionDetails::SecretRotation(serde_json::from_value(value)?),
            ActionType::TenantDeletion => ActionDetails::TenantDeletion(serde_json::from_value(value)?),
            ActionType::AddonActivation => {
                ActionDetails::AddonActivation(serde_json::from_value(value)?)
            }
        })
    }
}

impl ApprovalPayload {
    pub fn new(details: ActionDetails, reason: String, requested_at: DateTime<Utc>) -> Self {
        Self {
            details,
            timeline: Timeline {
                reason,
                requested_at: Some(requested_at),
                ..Timeline::default()
            },
        }
    }

    /// Flat JSON object written to the `payload` column.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut merged = match self.details.to_value()? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(timeline) = serde_json::to_value(&self.timeline)? {
            merged.extend(timeline);
        }
        Ok(Value::Object(merged))
    }

    pub fn from_json(action_type: ActionType, value: Value) -> Result<Self, AppError> {
        let details = ActionDetails::from_value(action_type, value.clone()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "stored {} payload is malformed: {}",
                action_type,
                e
            ))
        })?;
        let timeline: Timeline = serde_json::from_value(value).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("stored payload timeline is malformed: {}", e))
        })?;
        Ok(Self { details, timeline })
    }
}

impl Serialize for ApprovalPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}
