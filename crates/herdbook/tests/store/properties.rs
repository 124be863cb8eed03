//! Property tests over arbitrary sequences of adds with the backend flapping
//! between reachable and unreachable.

use proptest::prelude::*;
use serde_json::json;

use herdbook::{Persistence, RecordId};

use super::common::*;

#[derive(Clone, Debug)]
struct Step {
    name: String,
    online: bool,
}

fn arb_step() -> impl Strategy<Value = Step> {
    ("[a-z]{1,8}", any::<bool>()).prop_map(|(name, online)| Step { name, online })
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

proptest! {
    #[test]
    fn identifier_spaces_stay_disjoint(steps in prop::collection::vec(arb_step(), 0..16)) {
        let h = harness();
        let outcomes = block_on(async {
            let mut outcomes = Vec::new();
            for step in &steps {
                h.remote.set_offline(!step.online);
                let saved = h
                    .store
                    .add("cattle", fields(json!({ "name": step.name })), None)
                    .await
                    .expect("add never fails with a working ledger");
                outcomes.push(saved);
            }
            outcomes
        });

        for (step, saved) in steps.iter().zip(&outcomes) {
            let expected = if step.online { Persistence::Remote } else { Persistence::Local };
            prop_assert_eq!(saved.persistence, expected);
        }

        let ledger = h.store.ledger().load_all("cattle");
        prop_assert!(ledger.iter().all(|r| matches!(r.id, Some(RecordId::Local(_)))));
        prop_assert_eq!(ledger.len(), steps.iter().filter(|s| !s.online).count());

        h.remote.set_offline(false);
        let listed = block_on(h.store.list("cattle", None));
        let remote_count = h.remote.rows("cattle").len();
        prop_assert_eq!(listed.records.len(), remote_count + ledger.len());
        for (index, record) in listed.records.iter().enumerate() {
            let id = record.id.as_ref().expect("listed records carry ids");
            prop_assert_eq!(id.is_local(), index >= remote_count);
        }
    }

    #[test]
    fn reconcile_converges(steps in prop::collection::vec(arb_step(), 0..12)) {
        let h = harness();
        block_on(async {
            for step in &steps {
                h.remote.set_offline(!step.online);
                h.store
                    .add("cattle", fields(json!({ "name": step.name })), None)
                    .await
                    .expect("add");
            }
            h.remote.set_offline(false);
            h.store.reconcile("cattle", None).await;
        });

        prop_assert_eq!(h.ledger_len("cattle"), 0);
        prop_assert_eq!(h.remote.rows("cattle").len(), steps.len());
    }
}
