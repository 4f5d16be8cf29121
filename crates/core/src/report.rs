//! Adapter status reports and the per-(resource, adapter) record they fold into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::{check_inputs, Condition, ConditionDocument, ConditionInput};
use crate::ValidationError;

/// Owner of adapter status rows: a `(kind, id)` pair checked against the
/// kind registry at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: id.into() }
    }
}

/// Composite identity of one adapter status row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStatusKey {
    pub resource_type: String,
    pub resource_id: String,
    pub adapter: String,
}

impl AdapterStatusKey {
    pub fn new(resource: &ResourceRef, adapter: impl Into<String>) -> Self {
        Self { resource_type: resource.kind.clone(), resource_id: resource.id.clone(), adapter: adapter.into() }
    }
}

/// Execution bookkeeping an adapter may attach to a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,
}

/// Report body as received from an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAdapterStatus {
    pub adapter: String,
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<ConditionInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecutionMetadata>,
}

impl IncomingAdapterStatus {
    /// Shape checks that make a report a client error (not a discard).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.adapter.trim().is_empty() {
            return Err(ValidationError::EmptyField("adapter"));
        }
        if self.observed_generation < 0 {
            return Err(ValidationError::NegativeGeneration(self.observed_generation));
        }
        check_inputs(&self.conditions)
    }

    /// The report's conditions as a fresh document stamped at `now`.
    /// Call after `validate`.
    pub fn condition_document(&self, now: DateTime<Utc>) -> Result<ConditionDocument, ValidationError> {
        let conditions = self
            .conditions
            .iter()
            .cloned()
            .map(|c| Condition::from_input(c, self.observed_generation, now))
            .collect();
        ConditionDocument::new(conditions)
    }
}

/// Persisted, merged view of one adapter's status for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStatus {
    pub id: uuid::Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub adapter: String,
    pub observed_generation: i64,
    pub conditions: ConditionDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecutionMetadata>,
    pub created_time: DateTime<Utc>,
    pub last_report_time: DateTime<Utc>,
}

impl AdapterStatus {
    pub fn key(&self) -> AdapterStatusKey {
        AdapterStatusKey {
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            adapter: self.adapter.clone(),
        }
    }
}
