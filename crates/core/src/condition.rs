//! Condition documents: the JSON column shape shared by adapter status rows
//! and resource rows.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// PascalCase, letter first, no separators.
static CONDITION_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("static regex"));

/// True when `t` is usable as a condition type (and therefore as a query key).
pub fn is_valid_condition_type(t: &str) -> bool {
    CONDITION_TYPE_RE.is_match(t)
}

pub fn check_condition_type(t: &str) -> Result<(), ValidationError> {
    if is_valid_condition_type(t) {
        Ok(())
    } else {
        Err(ValidationError::InvalidConditionType(t.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }

    /// Case-sensitive: `"true"` is not a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "True" => Some(ConditionStatus::True),
            "False" => Some(ConditionStatus::False),
            "Unknown" => Some(ConditionStatus::Unknown),
            _ => None,
        }
    }

    pub fn is_determinate(&self) -> bool {
        !matches!(self, ConditionStatus::Unknown)
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ValidationError::InvalidConditionStatus(s.to_string()))
    }
}

/// A condition as reported by a caller: no timestamps, no generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionInput {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConditionInput {
    pub fn new(r#type: impl Into<String>, status: ConditionStatus) -> Self {
        Self { r#type: r#type.into(), status, reason: None, message: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A stored condition.
///
/// `last_transition_time` moves only when `status` changes. `created_time` and
/// `last_updated_time` are bookkeeping filled in on the storage side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Fresh condition as if first seen at `now`.
    pub fn from_input(input: ConditionInput, observed_generation: i64, now: DateTime<Utc>) -> Self {
        Self {
            r#type: input.r#type,
            status: input.status,
            reason: input.reason,
            message: input.message,
            observed_generation,
            last_transition_time: now,
            created_time: Some(now),
            last_updated_time: Some(now),
        }
    }
}

/// Why a stored document could not be read back.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("condition document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("condition document repeats type {0}")]
    DuplicateType(String),
}

/// Ordered list of conditions with unique `type` values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionDocument(Vec<Condition>);

impl ConditionDocument {
    pub fn new(conditions: Vec<Condition>) -> Result<Self, ValidationError> {
        if let Some(dup) = first_duplicate(conditions.iter().map(|c| c.r#type.as_str())) {
            return Err(ValidationError::DuplicateConditionType(dup.to_string()));
        }
        Ok(Self(conditions))
    }

    /// Caller guarantees type uniqueness.
    pub(crate) fn from_unique(conditions: Vec<Condition>) -> Self {
        Self(conditions)
    }

    /// Decode a document as persisted in a JSON column.
    pub fn from_json(raw: &str) -> Result<Self, DocumentError> {
        let conditions: Vec<Condition> = serde_json::from_str(raw)?;
        if let Some(dup) = first_duplicate(conditions.iter().map(|c| c.r#type.as_str())) {
            return Err(DocumentError::DuplicateType(dup.to_string()));
        }
        Ok(Self(conditions))
    }

    pub fn to_json(&self) -> String {
        // Vec<Condition> has no map keys or non-finite floats; serialization cannot fail.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn get(&self, r#type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.r#type == r#type)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Condition> {
        self.0
    }
}

impl<'a> IntoIterator for &'a ConditionDocument {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub(crate) fn first_duplicate<'a>(types: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    types.into_iter().find(|t| !seen.insert(*t))
}

/// Check a batch of caller-supplied conditions: PascalCase types, no repeats.
pub fn check_inputs(inputs: &[ConditionInput]) -> Result<(), ValidationError> {
    for c in inputs {
        check_condition_type(&c.r#type)?;
    }
    if let Some(dup) = first_duplicate(inputs.iter().map(|c| c.r#type.as_str())) {
        return Err(ValidationError::DuplicateConditionType(dup.to_string()));
    }
    Ok(())
}
