use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use herdbook::error::SchedulerError;
use herdbook::remote::{MemoryRemote, RemoteOp};
use herdbook::{ReconcileReport, ReconcileScheduler, Record, RecordId, ResilientStore};

use super::common::{fields, slow_store};

struct Setup {
    remote: Arc<MemoryRemote>,
    store: Arc<ResilientStore>,
    scheduler: Arc<ReconcileScheduler>,
}

async fn setup(offline_entries: &[&str]) -> Setup {
    let (remote, store) = slow_store(Duration::from_millis(100));

    remote.set_offline(true);
    for name in offline_entries {
        store
            .add("cattle", fields(json!({ "name": name })), None)
            .await
            .unwrap();
    }
    remote.set_offline(false);
    remote.clear_calls();

    let scheduler = Arc::new(ReconcileScheduler::new(
        store.clone(),
        Some(Duration::from_millis(500)),
    ));
    Setup {
        remote,
        store,
        scheduler,
    }
}

#[tokio::test(start_paused = true)]
async fn scheduled_reconcile_promotes() {
    let s = setup(&["Bessie"]).await;
    let report = s
        .scheduler
        .schedule_reconcile("cattle", None)
        .await
        .unwrap();
    assert_eq!(report.promoted.len(), 1);
    assert_eq!(s.store.ledger().load_all("cattle").len(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_follow_up_pass() {
    let s = setup(&["Bessie", "Clover"]).await;

    let (a, b, c) = tokio::join!(
        s.scheduler.schedule_reconcile("cattle", None),
        s.scheduler.schedule_reconcile("cattle", None),
        s.scheduler.schedule_reconcile("cattle", None),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    // The first request runs the pass; the other two are coalesced into the
    // follow-up, which finds nothing left to do.
    assert_eq!(a.promoted.len(), 2);
    assert!(b.promoted.is_empty());
    assert_eq!(b, c);
    assert_eq!(s.remote.calls_of(RemoteOp::Create).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn follow_up_runs_only_for_outstanding_work() {
    let s = setup(&["Bessie"]).await;
    let store = s.store.clone();

    let (first, second) = tokio::join!(
        s.scheduler.schedule_reconcile("cattle", None),
        async {
            // An entry lands in the ledger after the first pass took its
            // snapshot, then a second request queues behind the pass.
            tokio::time::sleep(Duration::from_millis(10)).await;
            let late = Record::with_id(
                RecordId::Local("local_late".to_string()),
                fields(json!({ "name": "Clover" })),
            );
            store.ledger().append("cattle", late).unwrap();
            s.scheduler.schedule_reconcile("cattle", None).await
        },
    );

    assert_eq!(first.unwrap().promoted.len(), 1);
    let second = second.unwrap();
    assert_eq!(second.promoted.len(), 1);
    assert_eq!(second.promoted[0].record.get("name"), Some(&json!("Clover")));
    assert!(!s.store.has_outstanding("cattle"));

    // Nothing is left, so a queued follow-up resolves without a pass.
    s.remote.clear_calls();
    let (a, b) = tokio::join!(
        s.scheduler.schedule_reconcile("cattle", None),
        s.scheduler.schedule_reconcile("cattle", None),
    );
    assert!(a.unwrap().promoted.is_empty());
    assert_eq!(b.unwrap(), ReconcileReport::new("cattle"));
    assert!(s.remote.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn schedule_all_reconciles_registered_resources() {
    let s = setup(&["Bessie"]).await;
    let reports = s.scheduler.schedule_reconcile_all(None).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].resource, "cattle");
    assert_eq!(reports[0].promoted.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disposed_scheduler_rejects_requests() {
    let s = setup(&[]).await;
    s.scheduler.dispose();
    assert!(s.scheduler.is_disposed());
    assert_eq!(
        s.scheduler.schedule_reconcile("cattle", None).await.unwrap_err(),
        SchedulerError::Disposed
    );
}

#[tokio::test(start_paused = true)]
async fn dispose_fails_queued_waiters() {
    let s = setup(&["Bessie"]).await;
    let scheduler = s.scheduler.clone();

    let (first, second) = tokio::join!(
        scheduler.schedule_reconcile("cattle", None),
        async {
            // Join while the first pass is still sleeping inside create.
            tokio::time::sleep(Duration::from_millis(10)).await;
            let waiting = scheduler.schedule_reconcile("cattle", None);
            tokio::pin!(waiting);
            tokio::select! {
                result = &mut waiting => result,
                _ = tokio::time::sleep(Duration::from_millis(20)) => {
                    scheduler.dispose();
                    waiting.await
                }
            }
        },
    );

    assert_eq!(first.unwrap().promoted.len(), 1);
    assert_eq!(second.unwrap_err(), SchedulerError::Disposed);
}

#[tokio::test(start_paused = true)]
async fn periodic_task_reconciles_in_the_background() {
    let s = setup(&["Bessie", "Clover"]).await;
    let handle = s
        .scheduler
        .spawn_periodic(Duration::from_secs(60), Some("u1".to_string()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(s.store.ledger().load_all("cattle").len(), 2);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(s.store.ledger().load_all("cattle").len(), 0);
    assert_eq!(s.remote.rows("cattle").len(), 2);

    s.scheduler.dispose();
    handle.abort();
}
