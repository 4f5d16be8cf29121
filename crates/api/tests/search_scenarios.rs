use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use fleet_api::{ApiError, ErrorClass, FleetApi, FleetConfig, InProcApi, ManualClock};
use fleet_core::{ConditionInput, ConditionStatus, KindRegistry, NewResource, ResourceRef};
use fleet_persist::{SqliteStore, StoreConfig};

fn temp_db() -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("fleet-api-search-{nanos}.db"))
}

async fn seeded() -> InProcApi {
    let store = Arc::new(SqliteStore::open(&StoreConfig::new(temp_db())).unwrap());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()));
    let api = InProcApi::with_parts(store, KindRegistry::reference(), clock.clone(), &FleetConfig::default());
    for (name, env, ready) in [
        ("prod-a", "production", ConditionStatus::True),
        ("prod-b", "production", ConditionStatus::False),
        ("stage-a", "staging", ConditionStatus::True),
    ] {
        clock.advance(chrono::Duration::seconds(1));
        let mut labels = BTreeMap::new();
        labels.insert("environment".to_string(), env.to_string());
        let r = api
            .create_resource("Cluster", NewResource { name: name.into(), labels, spec: serde_json::json!({ "secret": "x" }) })
            .await
            .unwrap();
        api.set_resource_conditions(ResourceRef::new("Cluster", r.id.to_string()), 1, vec![ConditionInput::new("Ready", ready)])
            .await
            .unwrap();
    }
    api
}

async fn names(api: &InProcApi, filter: &str) -> Vec<String> {
    api.search("Cluster", filter, None, None).await.unwrap().items.into_iter().map(|r| r.name).collect()
}

#[tokio::test]
async fn condition_and_label_search_is_order_independent() {
    let api = seeded().await;
    let a = names(&api, "labels.environment='production' AND status.conditions.Ready='True'").await;
    let b = names(&api, "status.conditions.Ready='True' AND labels.environment='production'").await;
    assert_eq!(a, vec!["prod-a".to_string()]);
    assert_eq!(a, b);
}

#[tokio::test]
async fn field_rejections_are_bad_requests_with_detail() {
    let api = seeded().await;
    for (filter, field) in [
        ("spec = '{}'", "spec"),
        ("status.conditions.ready='True'", "status.conditions.ready"),
        ("status.conditions.Ready='Invalid'", "status.conditions.Ready"),
    ] {
        let err = api.search("Cluster", filter, None, None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::BadRequest, "{filter}");
        let ApiError::Validation { fields, .. } = err else { panic!("expected validation error") };
        assert_eq!(fields, vec![field.to_string()], "{filter}");
    }
}

#[tokio::test]
async fn resource_conditions_reject_unknown_and_keep_transition_times() {
    let api = seeded().await;
    let page = api.search("Cluster", "name = 'prod-a'", None, None).await.unwrap();
    let r = &page.items[0];
    let rref = ResourceRef::new("Cluster", r.id.to_string());
    let before = r.status_conditions.get("Ready").unwrap().last_transition_time;

    let err = api
        .set_resource_conditions(rref.clone(), 1, vec![ConditionInput::new("Ready", ConditionStatus::Unknown)])
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::BadRequest);

    let again = api
        .set_resource_conditions(rref, 2, vec![ConditionInput::new("Ready", ConditionStatus::True).with_reason("StillReady")])
        .await
        .unwrap();
    let ready = again.status_conditions.get("Ready").unwrap();
    assert_eq!(ready.last_transition_time, before);
    assert_eq!(ready.observed_generation, 2);
}

#[tokio::test]
async fn paging_is_clamped_and_counted() {
    let api = seeded().await;
    let page = api.search("Cluster", "", Some(2), Some(2)).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].name, "stage-a");
}
