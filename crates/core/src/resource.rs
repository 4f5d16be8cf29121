//! Resource records as seen by this crate: owners of adapter status and
//! carriers of their own aggregate condition document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::condition::{check_inputs, ConditionDocument, ConditionInput};
use crate::ValidationError;

static LABEL_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._/-]{0,251}[A-Za-z0-9])?$").expect("static regex"));

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static regex"));

pub fn is_valid_label_key(key: &str) -> bool {
    LABEL_KEY_RE.is_match(key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: uuid::Uuid,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: serde_json::Value,
    pub generation: i64,
    #[serde(default)]
    pub status_conditions: ConditionDocument,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResource {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl NewResource {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !NAME_RE.is_match(&self.name) {
            return Err(ValidationError::InvalidName(self.name.clone()));
        }
        for key in self.labels.keys() {
            if !is_valid_label_key(key) {
                return Err(ValidationError::InvalidLabelKey(key.clone()));
            }
        }
        Ok(())
    }
}

/// Aggregate conditions written by the orchestrator. Unlike adapter
/// conditions these are two-valued.
pub fn check_resource_conditions(inputs: &[ConditionInput]) -> Result<(), ValidationError> {
    check_inputs(inputs)?;
    if let Some(c) = inputs.iter().find(|c| !c.status.is_determinate()) {
        return Err(ValidationError::IndeterminateResourceCondition(c.r#type.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConditionStatus::{True, Unknown};

    #[test]
    fn label_keys() {
        for ok in ["region", "environment", "app.kubernetes.io/name", "a"] {
            assert!(is_valid_label_key(ok), "{ok}");
        }
        for bad in ["", "-x", "x-", "has space", "quote\"", "a'b"] {
            assert!(!is_valid_label_key(bad), "{bad:?}");
        }
    }

    #[test]
    fn new_resource_validation() {
        let mut r = NewResource { name: "prod-eu-1".into(), labels: BTreeMap::new(), spec: serde_json::json!({}) };
        r.validate().unwrap();
        r.name = "Prod".into();
        assert!(matches!(r.validate(), Err(ValidationError::InvalidName(_))));
        r.name = "prod".into();
        r.labels.insert("bad key".into(), "v".into());
        assert!(matches!(r.validate(), Err(ValidationError::InvalidLabelKey(_))));
    }

    #[test]
    fn resource_conditions_are_two_valued() {
        assert!(check_resource_conditions(&[ConditionInput::new("Ready", True)]).is_ok());
        assert!(matches!(
            check_resource_conditions(&[ConditionInput::new("Ready", Unknown)]),
            Err(ValidationError::IndeterminateResourceCondition(t)) if t == "Ready"
        ));
    }
}
