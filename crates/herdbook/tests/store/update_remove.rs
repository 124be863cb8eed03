use serde_json::json;

use herdbook::error::StoreError;
use herdbook::ledger::PendingOp;
use herdbook::remote::{MemoryRemote, RemoteOp};
use herdbook::{Persistence, Record, RecordId, RemoteError, StoreEvent};

use super::common::*;

async fn local_entry(h: &Harness, name: &str) -> Record {
    h.remote.set_offline(true);
    let saved = h
        .store
        .add("cattle", fields(json!({ "name": name })), None)
        .await
        .unwrap();
    h.remote.set_offline(false);
    h.remote.clear_calls();
    saved.record
}

// ============================================================================
// update
// ============================================================================

#[tokio::test]
async fn update_without_id_is_rejected() {
    let h = harness();
    let err = h
        .store
        .update("cattle", Record::draft(fields(json!({ "name": "X" }))), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingId { ref resource } if resource == "cattle"));
}

#[tokio::test]
async fn update_of_local_entry_stays_local() {
    let h = harness();
    let mut record = local_entry(&h, "Bessie").await;
    record.set("weight", 420);

    let saved = h.store.update("cattle", record.clone(), None).await.unwrap();

    assert_eq!(saved.persistence, Persistence::Local);
    assert_eq!(saved.record.id, record.id);
    assert_eq!(saved.record.get("weight"), Some(&json!(420)));
    assert!(saved.record.get("updated_at").is_some());
    assert!(h.remote.calls().is_empty());

    let ledger = h.store.ledger().load_all("cattle");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].get("weight"), Some(&json!(420)));
}

#[tokio::test]
async fn update_of_unknown_local_id_is_not_found() {
    let h = harness();
    let record = Record::with_id(
        RecordId::Local("local_42".to_string()),
        fields(json!({ "name": "Ghost" })),
    );
    let err = h.store.update("cattle", record, None).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { ref id, .. } if id == "local_42"));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn update_of_remote_record_goes_to_the_backend() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", CATTLE_COLUMNS),
        |o| o,
    );
    let id = h
        .remote
        .seed("cattle", json!({ "name": "Clover", "user_id": "u1" }));
    let record = Record::with_id(RecordId::Remote(id.clone()), fields(json!({ "weight": 510 })));

    let saved = h.store.update("cattle", record, Some("u1")).await.unwrap();

    assert_eq!(saved.persistence, Persistence::Remote);
    assert_eq!(saved.record.get("name"), Some(&json!("Clover")));
    assert_eq!(saved.record.get("weight"), Some(&json!(510)));
    let update = &h.remote.calls_of(RemoteOp::Update)[0];
    assert_eq!(update.id.as_deref(), Some(id.as_str()));
    assert_eq!(update.filters.get("user_id"), Some(&json!("u1")));
    assert_eq!(h.ledger_len("cattle"), 0);
}

#[tokio::test]
async fn update_of_foreign_record_is_denied() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", CATTLE_COLUMNS),
        |o| o,
    );
    let id = h
        .remote
        .seed("cattle", json!({ "name": "Theirs", "user_id": "u2" }));
    let record = Record::with_id(RecordId::Remote(id), fields(json!({ "weight": 1 })));

    let err = h.store.update("cattle", record, Some("u1")).await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied { .. }));
    assert!(h.store.ledger().load_pending("cattle").is_empty());
}

#[tokio::test]
async fn update_of_missing_remote_record_is_not_found() {
    let h = harness();
    let record = Record::with_id(
        RecordId::Remote("5e0d6a8e-0000-4000-8000-000000000000".to_string()),
        fields(json!({ "weight": 1 })),
    );
    let err = h.store.update("cattle", record, None).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn failed_remote_update_is_queued_and_overlaid() {
    let h = harness();
    let id = h.remote.seed("cattle", json!({ "name": "Clover", "weight": 500 }));
    let record = Record::with_id(RecordId::Remote(id.clone()), fields(json!({ "weight": 530 })));

    h.remote.set_offline(true);
    let saved = h.store.update("cattle", record, None).await.unwrap();
    assert_eq!(saved.persistence, Persistence::Pending);
    assert_eq!(saved.record.get("weight"), Some(&json!(530)));
    assert!(matches!(saved.record.id, Some(RecordId::Remote(_))));

    let pending = h.store.ledger().load_pending("cattle");
    assert_eq!(pending.len(), 1);
    assert!(matches!(&pending[0], PendingOp::Update { id: queued, .. } if *queued == id));
    // The record itself is never demoted into the ledger.
    assert_eq!(h.ledger_len("cattle"), 0);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, StoreEvent::Deferred { .. })));

    h.remote.set_offline(false);
    let listed = h.store.list("cattle", None).await;
    assert_eq!(listed.records.len(), 1);
    assert_eq!(listed.records[0].get("weight"), Some(&json!(530)));
    assert_eq!(h.remote.rows("cattle")[0].get("weight"), Some(&json!(500)));
}

// ============================================================================
// remove
// ============================================================================

#[tokio::test]
async fn remove_of_local_entry_never_touches_the_backend() {
    let h = harness();
    let record = local_entry(&h, "Bessie").await;
    let id = record.id.unwrap();

    let persistence = h.store.remove("cattle", &id, None).await.unwrap();
    assert_eq!(persistence, Persistence::Local);
    assert_eq!(h.ledger_len("cattle"), 0);
    assert!(h.remote.calls_of(RemoteOp::Delete).is_empty());
}

#[tokio::test]
async fn remove_of_remote_record_deletes_remotely() {
    let h = harness();
    let id = h.remote.seed("cattle", json!({ "name": "Clover" }));

    let persistence = h
        .store
        .remove("cattle", &RecordId::Remote(id.clone()), None)
        .await
        .unwrap();
    assert_eq!(persistence, Persistence::Remote);
    assert!(h.remote.rows("cattle").is_empty());
    assert_eq!(
        h.remote.calls_of(RemoteOp::Delete)[0].id.as_deref(),
        Some(id.as_str())
    );
}

#[tokio::test]
async fn remove_of_foreign_record_is_denied() {
    let h = harness_with(
        MemoryRemote::new().with_columns("cattle", CATTLE_COLUMNS),
        |o| o,
    );
    let id = h
        .remote
        .seed("cattle", json!({ "name": "Theirs", "user_id": "u2" }));

    let err = h
        .store
        .remove("cattle", &RecordId::Remote(id), Some("u1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied { .. }));
    assert_eq!(h.remote.rows("cattle").len(), 1);
}

#[tokio::test]
async fn failed_remote_remove_hides_the_row_until_replayed() {
    let h = harness();
    let id = h.remote.seed("cattle", json!({ "name": "Clover" }));
    h.remote.seed("cattle", json!({ "name": "Daisy" }));

    h.remote
        .fail_next(RemoteOp::Delete, RemoteError::unreachable("connection reset"));
    let persistence = h
        .store
        .remove("cattle", &RecordId::Remote(id.clone()), None)
        .await
        .unwrap();
    assert_eq!(persistence, Persistence::Pending);
    assert_eq!(
        h.store.ledger().load_pending("cattle"),
        vec![PendingOp::Delete { id: id.clone() }]
    );

    let listed = h.store.list("cattle", None).await;
    assert_eq!(listed.records.len(), 1);
    assert_eq!(listed.records[0].get("name"), Some(&json!("Daisy")));
    assert_eq!(h.remote.rows("cattle").len(), 2);

    let report = h.store.reconcile("cattle", None).await;
    assert_eq!(report.replayed, 1);
    assert_eq!(h.remote.rows("cattle").len(), 1);
    assert!(h.store.ledger().load_pending("cattle").is_empty());
}

#[tokio::test]
async fn queued_delete_supersedes_queued_update() {
    let h = harness();
    let id = h.remote.seed("cattle", json!({ "name": "Clover" }));
    h.remote.set_offline(true);

    let record = Record::with_id(RecordId::Remote(id.clone()), fields(json!({ "weight": 1 })));
    h.store.update("cattle", record, None).await.unwrap();
    h.store
        .remove("cattle", &RecordId::Remote(id.clone()), None)
        .await
        .unwrap();

    assert_eq!(
        h.store.ledger().load_pending("cattle"),
        vec![PendingOp::Delete { id }]
    );
}
