use serde_json::json;

use herdbook::remote::{MemoryRemote, RemoteOp};
use herdbook::{RemoteError, RemoteErrorKind, StoreEvent};

use super::common::*;

#[tokio::test]
async fn empty_resource_lists_nothing() {
    let h = harness();
    let listed = h.store.list("cattle", None).await;
    assert!(listed.records.is_empty());
    assert!(!listed.degraded);
}

#[tokio::test]
async fn remote_rows_come_before_local_entries() {
    let h = harness();
    h.remote.seed("cattle", json!({ "name": "Clover" }));

    h.remote.set_offline(true);
    h.store
        .add("cattle", fields(json!({ "name": "Bessie" })), None)
        .await
        .unwrap();
    h.remote.set_offline(false);

    let listed = h.store.list("cattle", None).await;
    assert!(!listed.degraded);
    assert_eq!(listed.records.len(), 2);
    assert!(!listed.records[0].is_local());
    assert_eq!(listed.records[0].get("name"), Some(&json!("Clover")));
    assert!(listed.records[1].is_local());
    assert_eq!(listed.records[1].get("name"), Some(&json!("Bessie")));
}

#[tokio::test]
async fn unreachable_backend_serves_local_entries() {
    let h = harness();
    h.remote.seed("cattle", json!({ "name": "Clover" }));
    h.remote.set_offline(true);
    h.store
        .add("cattle", fields(json!({ "name": "Bessie" })), Some("u1"))
        .await
        .unwrap();

    let listed = h.store.list("cattle", Some("u1")).await;
    assert!(listed.degraded);
    assert_eq!(listed.records.len(), 1);
    assert_eq!(listed.records[0].get("name"), Some(&json!("Bessie")));

    assert!(h.events().iter().any(|e| matches!(
        e,
        StoreEvent::DegradedRead { resource, error }
            if resource == "cattle" && error.kind == RemoteErrorKind::Unreachable
    )));
}

#[tokio::test]
async fn unknown_fetch_error_degrades() {
    let h = harness();
    h.remote
        .fail_next(RemoteOp::FetchAll, RemoteError::unknown("500 internal"));
    let listed = h.store.list("cattle", None).await;
    assert!(listed.degraded);
}

#[tokio::test]
async fn absent_remote_resource_is_not_degraded() {
    let h = harness();
    h.remote.fail_next(
        RemoteOp::FetchAll,
        RemoteError::not_found("relation \"cattle\" does not exist"),
    );
    let listed = h.store.list("cattle", None).await;
    assert!(!listed.degraded);
    assert!(listed.records.is_empty());
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn rows_are_scoped_to_the_acting_user() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", CATTLE_COLUMNS),
        |o| o,
    );
    h.remote
        .seed("cattle", json!({ "name": "Mine", "user_id": "u1" }));
    h.remote
        .seed("cattle", json!({ "name": "Theirs", "user_id": "u2" }));

    let listed = h.store.list("cattle", Some("u1")).await;
    assert_eq!(listed.records.len(), 1);
    assert_eq!(listed.records[0].get("name"), Some(&json!("Mine")));

    let fetch = &h.remote.calls_of(RemoteOp::FetchAll)[0];
    assert_eq!(fetch.filters.get("user_id"), Some(&json!("u1")));
}

#[tokio::test]
async fn missing_owner_column_lists_unfiltered() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", LEGACY_CATTLE_COLUMNS),
        |o| o,
    );
    h.remote.seed("cattle", json!({ "name": "A" }));
    h.remote.seed("cattle", json!({ "name": "B" }));

    let listed = h.store.list("cattle", Some("u1")).await;
    assert!(!listed.degraded);
    assert_eq!(listed.records.len(), 2);
    assert!(h.remote.calls_of(RemoteOp::FetchAll)[0].filters.is_empty());
}

#[tokio::test]
async fn no_user_lists_unfiltered_without_probing() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", CATTLE_COLUMNS),
        |o| o,
    );
    h.remote
        .seed("cattle", json!({ "name": "A", "user_id": "u1" }));

    let listed = h.store.list("cattle", None).await;
    assert_eq!(listed.records.len(), 1);
    assert!(h.remote.calls_of(RemoteOp::Probe).is_empty());
}

#[tokio::test]
async fn failed_probe_fails_open() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", CATTLE_COLUMNS),
        |o| o,
    );
    h.remote
        .seed("cattle", json!({ "name": "Mine", "user_id": "u1" }));
    h.remote
        .seed("cattle", json!({ "name": "Theirs", "user_id": "u2" }));
    h.remote
        .fail_next(RemoteOp::Probe, RemoteError::unreachable("timeout"));

    let listed = h.store.list("cattle", Some("u1")).await;
    assert_eq!(listed.records.len(), 1);
}
