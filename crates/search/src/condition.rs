//! Condition predicate builder.

use fleet_core::condition::is_valid_condition_type;
use fleet_core::ConditionStatus;

use crate::ast::{CmpOp, Literal};
use crate::compile::SqlParam;
use crate::fields::columns;
use crate::SearchError;

/// "The element of the condition document with this type has this status."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionPredicate {
    pub condition_type: String,
    pub status: ConditionStatus,
}

impl ConditionPredicate {
    /// Path query over the JSON column, then compare. Both operands are bound.
    pub fn to_sql(&self, params: &mut Vec<SqlParam>) -> String {
        params.push(SqlParam::Text(self.condition_type.clone()));
        params.push(SqlParam::Text(self.status.as_str().to_string()));
        format!(
            "EXISTS (SELECT 1 FROM json_each({table}.{col}) AS cond \
             WHERE json_extract(cond.value, '$.type') = ? \
             AND json_extract(cond.value, '$.status') = ?)",
            table = columns::TABLE,
            col = columns::STATUS_CONDITIONS,
        )
    }
}

/// Validate one `status.conditions.<Type> op value` term.
///
/// Checks run in a fixed order: operator, type pattern, status value.
pub fn build_condition_predicate(
    condition_type: &str,
    op: CmpOp,
    value: &Literal,
) -> Result<ConditionPredicate, SearchError> {
    let field = || format!("{}{}", crate::fields::CONDITION_PREFIX, condition_type);
    if op != CmpOp::Eq {
        return Err(SearchError::UnsupportedOperator { field: field(), op: op.to_string() });
    }
    if !is_valid_condition_type(condition_type) {
        return Err(SearchError::InvalidConditionType(condition_type.to_string()));
    }
    let status = match value {
        Literal::Str(s) => ConditionStatus::parse(s),
        _ => None,
    }
    .ok_or_else(|| SearchError::InvalidConditionStatus { field: field(), value: value.to_string() })?;
    Ok(ConditionPredicate { condition_type: condition_type.to_string(), status })
}
