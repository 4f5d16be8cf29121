use fleet_search::{compile_filter, SearchError, SqlParam};

fn text(s: &str) -> SqlParam {
    SqlParam::Text(s.to_string())
}

#[test]
fn condition_and_label_filter_binds_everything() {
    let q = compile_filter("status.conditions.Ready='True' AND labels.environment='production'")
        .unwrap()
        .unwrap();
    assert_eq!(q.sql_placeholders(), q.params.len());
    assert_eq!(q.params, vec![text("environment"), text("production"), text("Ready"), text("True")]);
    for v in ["Ready", "True", "production", "environment"] {
        assert!(!q.where_sql.contains(v), "{v} leaked into SQL: {}", q.where_sql);
    }
}

#[test]
fn invalid_condition_inputs() {
    assert!(matches!(
        compile_filter("status.conditions.Ready='Invalid'"),
        Err(SearchError::InvalidConditionStatus { .. })
    ));
    assert!(matches!(
        compile_filter("status.conditions.ready='True'"),
        Err(SearchError::InvalidConditionType(t)) if t == "ready"
    ));
    assert!(matches!(
        compile_filter("status.conditions.Ready!='True'"),
        Err(SearchError::UnsupportedOperator { .. })
    ));
}

#[test]
fn spec_and_unknown_fields_are_reported_together() {
    match compile_filter("spec.region = 'eu' AND status.phase = 'Ready' AND name = 'a'") {
        Err(SearchError::InvalidField { fields }) => {
            assert_eq!(fields, vec!["spec.region".to_string(), "status.phase".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn rejected_field_is_reported_before_bad_values() {
    match compile_filter("spec = '{}' AND name = 3") {
        Err(SearchError::InvalidField { fields }) => assert_eq!(fields, vec!["spec".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
    match compile_filter("spec = '{}' AND status.conditions.ready = 'True'") {
        Err(SearchError::InvalidField { fields }) => assert_eq!(fields, vec!["spec".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn parse_errors_surface_before_mapping() {
    assert!(matches!(compile_filter("spec = "), Err(SearchError::Parse { offset: 7, .. })));
}

#[test]
fn same_condition_twice_is_two_predicates() {
    let q = compile_filter("status.conditions.Ready='True' AND status.conditions.Ready='False'")
        .unwrap()
        .unwrap();
    assert_eq!(q.params.len(), 4);
}

trait Placeholders {
    fn sql_placeholders(&self) -> usize;
}

impl Placeholders for fleet_search::StorageQuery {
    fn sql_placeholders(&self) -> usize {
        self.where_sql.matches('?').count()
    }
}
