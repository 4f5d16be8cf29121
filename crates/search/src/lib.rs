//! Fleet search: filter language for resource listing.
//!
//! A filter string is parsed into an [`Expr`], condition terms are lifted out
//! and validated, and the rest is mapped onto the `resources` table. The
//! output is a parameterised WHERE fragment; no user value is ever spliced
//! into SQL text.

#![forbid(unsafe_code)]

pub mod ast;
pub mod compile;
pub mod condition;
pub mod fields;
pub mod parse;

pub use ast::{CmpOp, Comparison, Expr, Literal};
pub use compile::{compile, SqlParam, StorageQuery};
pub use condition::{build_condition_predicate, ConditionPredicate};
pub use fields::{map_field, FieldTarget, Rejection};
pub use parse::parse_filter;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    /// Every rejected field in the filter, in order of appearance.
    #[error("invalid search field(s): {}", fields.join(", "))]
    InvalidField { fields: Vec<String> },
    #[error("invalid condition type {0:?}: must match ^[A-Z][A-Za-z0-9]*$")]
    InvalidConditionType(String),
    #[error("invalid value {value} for {field}: condition status must be one of True, False, Unknown")]
    InvalidConditionStatus { field: String, value: String },
    #[error("operator {op} is not supported for {field}")]
    UnsupportedOperator { field: String, op: String },
    #[error("invalid value {value} for {field}: {reason}")]
    InvalidValue { field: String, value: String, reason: String },
    #[error("condition term {0} may only appear in AND-combined filters")]
    ConditionInDisjunction(String),
}

/// Parse and compile in one go. Blank input yields `None` (match everything).
pub fn compile_filter(src: &str) -> Result<Option<StorageQuery>, SearchError> {
    match parse_filter(src)? {
        Some(expr) => compile(expr).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filter_compiles_to_nothing() {
        assert_eq!(compile_filter("").unwrap(), None);
    }

    #[test]
    fn invalid_field_message_lists_all() {
        let e = SearchError::InvalidField { fields: vec!["spec".into(), "foo".into()] };
        assert_eq!(e.to_string(), "invalid search field(s): spec, foo");
    }
}
