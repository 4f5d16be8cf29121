//! Kind registry: the closed set of resource kinds that own adapter status,
//! and the mandatory condition types each kind enforces.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::condition::check_condition_type;
use crate::ValidationError;

/// Mandatory set used by the reference deployment.
pub const DEFAULT_MANDATORY_CONDITIONS: &[&str] = &["Available", "Applied", "Health"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSpec {
    #[serde(default)]
    pub mandatory_conditions: BTreeSet<String>,
}

impl KindSpec {
    pub fn with_mandatory<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { mandatory_conditions: types.into_iter().map(Into::into).collect() }
    }
}

/// `kind -> KindSpec`, injected wherever kind-specific behaviour is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KindRegistry {
    kinds: BTreeMap<String, KindSpec>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Cluster` and `NodePool`, each with the default mandatory set.
    pub fn reference() -> Self {
        let mut r = Self::new();
        for kind in ["Cluster", "NodePool"] {
            r.kinds.insert(kind.to_string(), KindSpec::with_mandatory(DEFAULT_MANDATORY_CONDITIONS.iter().copied()));
        }
        r
    }

    pub fn insert(&mut self, kind: impl Into<String>, spec: KindSpec) -> Result<(), ValidationError> {
        let kind = kind.into();
        check_kind_name(&kind)?;
        for t in &spec.mandatory_conditions {
            check_condition_type(t)?;
        }
        self.kinds.insert(kind, spec);
        Ok(())
    }

    /// Replace the mandatory set of every registered kind.
    pub fn set_mandatory_everywhere(&mut self, types: &BTreeSet<String>) -> Result<(), ValidationError> {
        for t in types {
            check_condition_type(t)?;
        }
        for spec in self.kinds.values_mut() {
            spec.mandatory_conditions = types.clone();
        }
        Ok(())
    }

    pub fn resolve(&self, kind: &str) -> Result<&KindSpec, ValidationError> {
        self.kinds.get(kind).ok_or_else(|| ValidationError::UnknownResourceKind(kind.to_string()))
    }

    /// Re-check names loaded through serde, which bypasses `insert`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (kind, spec) in &self.kinds {
            check_kind_name(kind)?;
            for t in &spec.mandatory_conditions {
                check_condition_type(t)?;
            }
        }
        Ok(())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

fn check_kind_name(kind: &str) -> Result<(), ValidationError> {
    // Kind names follow the same PascalCase shape as condition types.
    if crate::condition::is_valid_condition_type(kind) {
        Ok(())
    } else {
        Err(ValidationError::UnknownResourceKind(kind.to_string()))
    }
}
