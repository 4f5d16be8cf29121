//! Fleet core types: condition documents, the mandatory-condition gate and the
//! merge engine that folds adapter reports into stored status.
//!
//! Everything here is pure; storage lives in `fleet-persist`.

#![forbid(unsafe_code)]

pub mod condition;
pub mod mandatory;
pub mod merge;
pub mod registry;
pub mod report;
pub mod resource;

use chrono::{DateTime, SecondsFormat, Utc};

pub use condition::{Condition, ConditionDocument, ConditionInput, ConditionStatus, DocumentError};
pub use mandatory::{validate_mandatory, RejectionReason};
pub use merge::{merge, merge_stored, StoredMerge};
pub use registry::{KindRegistry, KindSpec, DEFAULT_MANDATORY_CONDITIONS};
pub use report::{AdapterStatus, AdapterStatusKey, ExecutionMetadata, IncomingAdapterStatus, ResourceRef};
pub use resource::{NewResource, Resource};

/// Client-caused input problems. Never retryable without changing the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid condition type {0:?}: must match ^[A-Z][A-Za-z0-9]*$")]
    InvalidConditionType(String),
    #[error("invalid condition status {0:?}: must be one of True, False, Unknown")]
    InvalidConditionStatus(String),
    #[error("condition type {0:?} appears more than once")]
    DuplicateConditionType(String),
    #[error("resource condition {0:?} must be True or False")]
    IndeterminateResourceCondition(String),
    #[error("unknown resource kind {0:?}")]
    UnknownResourceKind(String),
    #[error("field {0} must not be empty")]
    EmptyField(&'static str),
    #[error("observed generation must be non-negative, got {0}")]
    NegativeGeneration(i64),
    #[error("invalid resource name {0:?}")]
    InvalidName(String),
    #[error("invalid label key {0:?}")]
    InvalidLabelKey(String),
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order
/// matches time order inside the database.
pub fn to_storage_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_storage_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

pub mod prelude {
    pub use super::{
        AdapterStatus, AdapterStatusKey, Condition, ConditionDocument, ConditionInput, ConditionStatus,
        IncomingAdapterStatus, KindRegistry, RejectionReason, Resource, ResourceRef, ValidationError,
    };
}
