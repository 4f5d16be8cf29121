//! Mandatory-condition gate for incoming adapter reports.
//!
//! A report that omits a mandatory type, or reports one as `Unknown`, is not an
//! error: it is discarded so that a transient "don't know yet" never overwrites
//! known state.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::ConditionInput;

/// Why a report failed the mandatory gate. Both lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionReason {
    pub missing: Vec<String>,
    pub indeterminate: Vec<String>,
}

impl RejectionReason {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.indeterminate.is_empty()
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "incomplete or indeterminate mandatory conditions")?;
        if !self.missing.is_empty() {
            write!(f, "; missing: {}", self.missing.join(","))?;
        }
        if !self.indeterminate.is_empty() {
            write!(f, "; unknown: {}", self.indeterminate.join(","))?;
        }
        Ok(())
    }
}

/// Succeeds only if every type in `mandatory` is present with a status other
/// than `Unknown`. Pure.
pub fn validate_mandatory(
    conditions: &[ConditionInput],
    mandatory: &BTreeSet<String>,
) -> Result<(), RejectionReason> {
    let mut reason = RejectionReason::default();
    for required in mandatory {
        match conditions.iter().find(|c| &c.r#type == required) {
            None => reason.missing.push(required.clone()),
            Some(c) if !c.status.is_determinate() => reason.indeterminate.push(required.clone()),
            Some(_) => {}
        }
    }
    if reason.is_empty() {
        Ok(())
    } else {
        Err(reason)
    }
}
