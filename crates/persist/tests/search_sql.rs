use std::collections::BTreeMap;

use chrono::{Duration, TimeZone, Utc};
use fleet_core::{Condition, ConditionDocument, ConditionInput, ConditionStatus, NewResource, Resource, ResourceRef};
use fleet_persist::{Cancellation, PageRequest, SqliteStore, Store, StoreConfig};
use fleet_search::compile_filter;

fn temp_db() -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("fleet-search-{nanos}.db"))
}

struct Fixture {
    store: SqliteStore,
}

impl Fixture {
    fn new() -> Self {
        Self { store: SqliteStore::open(&StoreConfig::new(temp_db())).unwrap() }
    }

    fn add(&self, name: &str, env: &str, ready: Option<ConditionStatus>, offset_secs: i64) -> Resource {
        let mut labels = BTreeMap::new();
        labels.insert("environment".to_string(), env.to_string());
        labels.insert("app.kubernetes.io/name".to_string(), name.to_string());
        let new = NewResource { name: name.into(), labels, spec: serde_json::json!({ "region": "eu" }) };
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs);
        let r = self.store.create_resource(&Cancellation::new(), "Cluster", &new, at).unwrap();
        let Some(status) = ready else { return r };
        let doc = ConditionDocument::new(vec![
            Condition::from_input(ConditionInput::new("Ready", status), 1, at),
            Condition::from_input(ConditionInput::new("Available", ConditionStatus::True), 1, at),
        ])
        .unwrap();
        self.store
            .update_resource_conditions(&Cancellation::new(), &ResourceRef::new("Cluster", r.id.to_string()), at, &mut |_| {
                doc.to_json()
            })
            .unwrap()
    }

    fn names(&self, filter: &str) -> Vec<String> {
        let q = compile_filter(filter).unwrap();
        let page = self
            .store
            .search_resources(&Cancellation::new(), "Cluster", q.as_ref(), PageRequest::new(1, 100))
            .unwrap();
        page.items.into_iter().map(|r| r.name).collect()
    }
}

#[test]
fn condition_and_label_filter_matches_both_predicates() {
    let f = Fixture::new();
    f.add("prod-ready", "production", Some(ConditionStatus::True), 0);
    f.add("prod-not-ready", "production", Some(ConditionStatus::False), 1);
    f.add("dev-ready", "development", Some(ConditionStatus::True), 2);
    f.add("prod-fresh", "production", None, 3);

    let a = f.names("labels.environment='production' AND status.conditions.Ready='True'");
    let b = f.names("status.conditions.Ready='True' AND labels.environment='production'");
    assert_eq!(a, vec!["prod-ready".to_string()]);
    assert_eq!(a, b);
}

#[test]
fn direct_columns_labels_and_boolean_structure() {
    let f = Fixture::new();
    f.add("alpha", "production", None, 0);
    f.add("beta", "staging", None, 10);
    f.add("gamma", "development", None, 20);

    assert_eq!(f.names("name = 'beta'"), vec!["beta"]);
    assert_eq!(f.names("labels.environment != 'production'"), vec!["beta", "gamma"]);
    assert_eq!(f.names("name = 'alpha' OR labels.app.kubernetes.io/name = 'gamma'"), vec!["alpha", "gamma"]);
    assert_eq!(f.names("NOT (name = 'alpha')"), vec!["beta", "gamma"]);
    assert_eq!(f.names("created_time >= '2026-01-01T00:00:10Z'"), vec!["beta", "gamma"]);
    assert_eq!(f.names("generation = 1 AND kind = 'Cluster'").len(), 3);
    assert!(f.names("labels.missing = 'x'").is_empty());
    assert_eq!(f.names("").len(), 3);
}

#[test]
fn injection_attempts_match_nothing() {
    let f = Fixture::new();
    f.add("alpha", "production", Some(ConditionStatus::True), 0);
    assert!(f.names("name = 'x'' OR 1=1 --'").is_empty());
    assert!(f.names("labels.environment = 'production'' OR ''1''=''1'").is_empty());
    // Table is still there.
    assert_eq!(f.names("name = 'alpha'"), vec!["alpha"]);
}

#[test]
fn pagination_and_totals() {
    let f = Fixture::new();
    for i in 0..5 {
        f.add(&format!("c{i}"), "production", None, i);
    }
    let q = compile_filter("labels.environment = 'production'").unwrap();
    let page = f
        .store
        .search_resources(&Cancellation::new(), "Cluster", q.as_ref(), PageRequest::new(2, 2))
        .unwrap();
    assert_eq!(page.total, 5);
    let names: Vec<_> = page.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["c2", "c3"]);
}

#[test]
fn deleted_resources_are_not_found() {
    let f = Fixture::new();
    let r = f.add("gone", "production", None, 0);
    f.store
        .soft_delete_resource(&Cancellation::new(), &ResourceRef::new("Cluster", r.id.to_string()), Utc::now())
        .unwrap();
    assert!(f.names("name = 'gone'").is_empty());
}
