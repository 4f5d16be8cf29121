//! Search query compiler.
//!
//! 0. Refuse the whole filter if any field is unknown or off limits.
//! 1. Pull every `status.conditions.<Type>` leaf off the AND spine of the tree
//!    and turn it into a [`ConditionPredicate`].
//! 2. Translate what is left through the field mapper.
//! 3. AND the two together.
//!
//! Condition leaves under OR or NOT are refused: hoisting them to the top
//! level would change what the filter means.

use smallvec::SmallVec;
use tracing::debug;

use crate::ast::{CmpOp, Comparison, Expr, Literal};
use crate::condition::{build_condition_predicate, ConditionPredicate};
use crate::fields::{is_condition_field, map_field, columns, Column, ColumnType, FieldTarget};
use crate::SearchError;

/// A value bound to a `?` placeholder, in order of appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
}

/// Parameterised WHERE fragment over the `resources` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageQuery {
    pub where_sql: String,
    pub params: Vec<SqlParam>,
}

type Extracted = SmallVec<[ConditionPredicate; 4]>;

pub fn compile(expr: Expr) -> Result<StorageQuery, SearchError> {
    let res = compile_inner(expr);
    let result = if res.is_ok() { "ok" } else { "invalid" };
    metrics::counter!("search_queries_total", 1u64, "result" => result);
    res
}

fn compile_inner(expr: Expr) -> Result<StorageQuery, SearchError> {
    if has_empty_group(&expr) {
        return Err(SearchError::Parse { offset: 0, message: "empty AND/OR group".to_string() });
    }
    // Field rejections win over every other error, wherever they sit in the tree.
    let rejected: Vec<String> =
        expr.leaves().into_iter().filter(|c| map_field(&c.field).is_err()).map(|c| c.field.clone()).collect();
    if !rejected.is_empty() {
        return Err(SearchError::InvalidField { fields: rejected });
    }

    let mut extracted: Extracted = SmallVec::new();
    let rest = extract_conditions(expr, &mut extracted)?;

    let mut params = Vec::new();
    let mut parts: Vec<String> = Vec::with_capacity(1 + extracted.len());
    if let Some(rest) = rest {
        parts.push(translate(&rest, &mut params)?);
    }
    for p in extracted.iter() {
        parts.push(p.to_sql(&mut params));
    }
    let where_sql = match parts.len() {
        1 => parts.remove(0),
        _ => parts.iter().map(|p| format!("({p})")).collect::<Vec<_>>().join(" AND "),
    };
    debug!(sql = %where_sql, params = params.len(), conditions = extracted.len(), "search: compiled filter");
    Ok(StorageQuery { where_sql, params })
}

fn has_empty_group(expr: &Expr) -> bool {
    match expr {
        Expr::Compare(_) => false,
        Expr::And(xs) | Expr::Or(xs) => xs.is_empty() || xs.iter().any(has_empty_group),
        Expr::Not(x) => has_empty_group(x),
    }
}

/// Returns the tree with condition leaves removed, or `None` if nothing is left.
fn extract_conditions(expr: Expr, out: &mut Extracted) -> Result<Option<Expr>, SearchError> {
    match expr {
        Expr::Compare(c) => {
            if let Ok(FieldTarget::Condition(t)) = map_field(&c.field) {
                out.push(build_condition_predicate(t, c.op, &c.value)?);
                return Ok(None);
            }
            Ok(Some(Expr::Compare(c)))
        }
        Expr::And(children) => {
            let mut kept = Vec::with_capacity(children.len());
            for child in children {
                if let Some(k) = extract_conditions(child, out)? {
                    kept.push(k);
                }
            }
            Ok(match kept.len() {
                0 => None,
                1 => kept.pop(),
                _ => Some(Expr::And(kept)),
            })
        }
        other => {
            if let Some(c) = other.leaves().into_iter().find(|c| is_condition_field(&c.field)) {
                return Err(SearchError::ConditionInDisjunction(c.field.clone()));
            }
            Ok(Some(other))
        }
    }
}

fn translate(expr: &Expr, params: &mut Vec<SqlParam>) -> Result<String, SearchError> {
    match expr {
        Expr::Compare(c) => translate_leaf(c, params),
        Expr::And(xs) => join(xs, " AND ", params),
        Expr::Or(xs) => join(xs, " OR ", params),
        Expr::Not(x) => Ok(format!("NOT ({})", translate(x, params)?)),
    }
}

fn join(xs: &[Expr], sep: &str, params: &mut Vec<SqlParam>) -> Result<String, SearchError> {
    let mut parts = Vec::with_capacity(xs.len());
    for x in xs {
        parts.push(translate(x, params)?);
    }
    Ok(format!("({})", parts.join(sep)))
}

fn translate_leaf(c: &Comparison, params: &mut Vec<SqlParam>) -> Result<String, SearchError> {
    match map_field(&c.field) {
        Ok(FieldTarget::Column(col)) => column_predicate(col, c, params),
        Ok(FieldTarget::Label(key)) => {
            let Literal::Str(v) = &c.value else {
                return Err(invalid_value(c, "label values are strings"));
            };
            params.push(SqlParam::Text(key.to_string()));
            params.push(SqlParam::Text(v.clone()));
            Ok(format!("json_extract({}, '$.\"' || ? || '\"') {} ?", columns::LABELS, c.op.sql()))
        }
        // Only reachable for leaves under OR/NOT, which extraction already refused.
        Ok(FieldTarget::Condition(_)) => Err(SearchError::ConditionInDisjunction(c.field.clone())),
        Err(_) => Err(SearchError::InvalidField { fields: vec![c.field.clone()] }),
    }
}

fn column_predicate(col: Column, c: &Comparison, params: &mut Vec<SqlParam>) -> Result<String, SearchError> {
    let param = match (col.ty, &c.value) {
        (ColumnType::Text, Literal::Str(s)) => SqlParam::Text(s.clone()),
        (ColumnType::Integer, Literal::Int(i)) => SqlParam::Integer(*i),
        (ColumnType::Timestamp, Literal::Str(s)) => match fleet_core::parse_storage_time(s) {
            Some(ts) => SqlParam::Text(fleet_core::to_storage_time(ts)),
            None => return Err(invalid_value(c, "expected an RFC 3339 timestamp")),
        },
        (ColumnType::Text, _) => return Err(invalid_value(c, "expected a quoted string")),
        (ColumnType::Integer, _) => return Err(invalid_value(c, "expected an integer")),
        (ColumnType::Timestamp, _) => return Err(invalid_value(c, "expected an RFC 3339 timestamp")),
    };
    if matches!(c.op, CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge) && col.name == columns::ID {
        return Err(SearchError::UnsupportedOperator { field: c.field.clone(), op: c.op.to_string() });
    }
    params.push(param);
    Ok(format!("{} {} ?", col.name, c.op.sql()))
}

fn invalid_value(c: &Comparison, reason: &str) -> SearchError {
    SearchError::InvalidValue { field: c.field.clone(), value: c.value.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_filter;

    fn compile_str(s: &str) -> Result<StorageQuery, SearchError> {
        compile(parse_filter(s)?.expect("non-empty filter"))
    }

    fn text(s: &str) -> SqlParam {
        SqlParam::Text(s.to_string())
    }

    #[test]
    fn direct_column() {
        let q = compile_str("name = 'prod'").unwrap();
        assert_eq!(q.where_sql, "name = ?");
        assert_eq!(q.params, vec![text("prod")]);
    }

    #[test]
    fn condition_is_hoisted_and_anded() {
        let q = compile_str("status.conditions.Ready='True' AND labels.environment='production'").unwrap();
        assert!(q.where_sql.starts_with("(json_extract(labels"));
        assert!(q.where_sql.contains(") AND (EXISTS"));
        assert_eq!(q.params, vec![text("environment"), text("production"), text("Ready"), text("True")]);
    }

    #[test]
    fn order_of_terms_does_not_change_the_query() {
        let a = compile_str("labels.environment='production' AND status.conditions.Ready='True'").unwrap();
        let b = compile_str("status.conditions.Ready='True' AND labels.environment='production'").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn only_conditions() {
        let q = compile_str("status.conditions.Ready='True' AND status.conditions.Health='False'").unwrap();
        assert_eq!(q.params, vec![text("Ready"), text("True"), text("Health"), text("False")]);
        assert!(q.where_sql.starts_with("(EXISTS"));
    }

    #[test]
    fn nested_and_groups_are_searched_for_conditions() {
        let q = compile_str("(name='a' AND (status.conditions.Ready='True' AND generation > 1))").unwrap();
        assert_eq!(q.params, vec![text("a"), SqlParam::Integer(1), text("Ready"), text("True")]);
    }

    #[test]
    fn rejected_fields_are_aggregated() {
        match compile_str("spec = '{}' AND name = 'x' OR bogus = 'y'") {
            Err(SearchError::InvalidField { fields }) => assert_eq!(fields, vec!["spec".to_string(), "bogus".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn field_rejection_hides_value_and_condition_errors() {
        for filter in [
            "spec = '{}' AND name = 3",
            "spec = '{}' AND status.conditions.ready='True'",
            "name = 3 AND spec = '{}'",
            "spec = '{}' AND (name = 'a' OR status.conditions.Ready='True')",
        ] {
            match compile_str(filter) {
                Err(SearchError::InvalidField { fields }) => assert_eq!(fields, vec!["spec".to_string()], "{filter}"),
                other => panic!("{filter}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn empty_groups_are_refused() {
        for expr in [
            Expr::And(vec![]),
            Expr::Or(vec![]),
            Expr::Not(Box::new(Expr::Or(vec![]))),
            Expr::And(vec![Expr::Compare(Comparison::new("name", CmpOp::Eq, Literal::Str("a".into()))), Expr::Or(vec![])]),
        ] {
            assert!(matches!(compile(expr.clone()), Err(SearchError::Parse { .. })), "{expr:?}");
        }
    }

    #[test]
    fn condition_errors() {
        assert!(matches!(compile_str("status.conditions.ready='True'"), Err(SearchError::InvalidConditionType(_))));
        assert!(matches!(
            compile_str("status.conditions.Ready='Invalid'"),
            Err(SearchError::InvalidConditionStatus { .. })
        ));
        assert!(matches!(
            compile_str("name='a' OR status.conditions.Ready='True'"),
            Err(SearchError::ConditionInDisjunction(f)) if f == "status.conditions.Ready"
        ));
        assert!(matches!(
            compile_str("NOT status.conditions.Ready='True'"),
            Err(SearchError::ConditionInDisjunction(_))
        ));
    }

    #[test]
    fn typed_columns() {
        let q = compile_str("created_time >= '2026-01-01T00:00:00Z'").unwrap();
        assert_eq!(q.params, vec![text("2026-01-01T00:00:00.000000Z")]);
        assert!(matches!(compile_str("generation = 'one'"), Err(SearchError::InvalidValue { .. })));
        assert!(matches!(compile_str("name = 3"), Err(SearchError::InvalidValue { .. })));
        assert!(matches!(compile_str("created_time > 'yesterday'"), Err(SearchError::InvalidValue { .. })));
        assert!(matches!(compile_str("labels.region = true"), Err(SearchError::InvalidValue { .. })));
    }

    #[test]
    fn or_and_not_translate_in_place() {
        let q = compile_str("NOT (name='a' OR labels.tier != 'gold')").unwrap();
        assert_eq!(q.where_sql, "NOT ((name = ? OR json_extract(labels, '$.\"' || ? || '\"') != ?))");
        assert_eq!(q.params, vec![text("a"), text("tier"), text("gold")]);
    }

    #[test]
    fn user_values_never_reach_sql_text() {
        let q = compile_str("name = 'x''; DROP TABLE resources; --' AND labels.region = 'eu'").unwrap();
        assert!(!q.where_sql.contains("DROP"));
        assert!(!q.where_sql.contains("eu"));
    }
}
