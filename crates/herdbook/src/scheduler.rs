//! ReconcileScheduler: coalescing and cadence on top of
//! [`ResilientStore::reconcile`].
//!
//! Requests for a key (resource plus acting user) that arrive while a pass is
//! running, or during the cooldown after it, are queued and share the result
//! of one follow-up pass. A follow-up finding nothing left in the ledger or
//! the outbox resolves its waiters with empty reports instead of running.
//! Reconciliation can also be driven by a periodic background task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::store::{ReconcileReport, ResilientStore};

/// Default cooldown between two passes of the same key.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(1000);

type Outcome = Result<Vec<ReconcileReport>, SchedulerError>;
type PassFuture = Pin<Box<dyn Future<Output = Vec<ReconcileReport>> + Send>>;
type PassFn = Arc<dyn Fn() -> PassFuture + Send + Sync>;

// ============================================================================
// ReconcileScheduler
// ============================================================================

pub struct ReconcileScheduler {
    store: Arc<ResilientStore>,
    throttle: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
    disposed: Arc<AtomicBool>,
}

#[derive(Default)]
struct Slot {
    running: bool,
    cooling_down: bool,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

enum Action {
    Run,
    Wait(oneshot::Receiver<Outcome>),
}

/// A repeatable pass and the resources it covers.
struct Pass {
    run: PassFn,
    store: Arc<ResilientStore>,
    resources: Vec<String>,
}

impl Pass {
    async fn follow_up(&self) -> Vec<ReconcileReport> {
        if self.resources.iter().any(|r| self.store.has_outstanding(r)) {
            return (self.run)().await;
        }
        debug!(resources = ?self.resources, "nothing outstanding, skipping follow-up pass");
        self.resources.iter().map(ReconcileReport::new).collect()
    }
}

impl ReconcileScheduler {
    /// `throttle` defaults to [`DEFAULT_THROTTLE`].
    pub fn new(store: Arc<ResilientStore>, throttle: Option<Duration>) -> Self {
        Self {
            store,
            throttle: throttle.unwrap_or(DEFAULT_THROTTLE),
            slots: Mutex::new(HashMap::new()),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &Arc<ResilientStore> {
        &self.store
    }

    /// Reconcile one resource, joining an in-flight or queued pass if there
    /// is one.
    pub async fn schedule_reconcile(
        &self,
        resource: &str,
        acting_user: Option<String>,
    ) -> Result<ReconcileReport, SchedulerError> {
        self.check_disposed()?;
        let key = slot_key(resource, acting_user.as_deref());
        let store = self.store.clone();
        let owned = resource.to_string();
        let reports = self
            .schedule(key, vec![resource.to_string()], move || {
                let store = store.clone();
                let resource = owned.clone();
                let user = acting_user.clone();
                async move { vec![store.reconcile(&resource, user.as_deref()).await] }
            })
            .await?;
        Ok(reports
            .into_iter()
            .next()
            .unwrap_or_else(|| ReconcileReport::new(resource)))
    }

    /// Reconcile every registered resource. Uses its own slot, separate from
    /// per-resource requests; the store's per-resource locks keep the two
    /// from overlapping on one resource.
    pub async fn schedule_reconcile_all(
        &self,
        acting_user: Option<String>,
    ) -> Result<Vec<ReconcileReport>, SchedulerError> {
        self.check_disposed()?;
        let key = slot_key("*", acting_user.as_deref());
        let store = self.store.clone();
        let resources = self.store.resources().to_vec();
        self.schedule(key, resources, move || {
            let store = store.clone();
            let user = acting_user.clone();
            async move { store.reconcile_all(user.as_deref()).await }
        })
        .await
    }

    /// Reconcile everything every `interval` until the scheduler is disposed
    /// or the handle is aborted. The first pass runs after one interval.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        interval: Duration,
        acting_user: Option<String>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match scheduler.schedule_reconcile_all(acting_user.clone()).await {
                    Ok(reports) => {
                        let pending: usize = reports.iter().map(|r| r.remaining).sum();
                        debug!(pending, "periodic reconcile finished");
                    }
                    Err(SchedulerError::Disposed) => break,
                    Err(e) => warn!(error = %e, "periodic reconcile failed"),
                }
            }
        })
    }

    /// Stop accepting requests and fail every queued waiter.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let mut slots = self.slots.lock();
        for (_, slot) in slots.drain() {
            for waiter in slot.lock().waiters.drain(..) {
                let _ = waiter.send(Err(SchedulerError::Disposed));
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn check_disposed(&self) -> Result<(), SchedulerError> {
        if self.is_disposed() {
            Err(SchedulerError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Sync helper so no guard outlives the call.
    fn check_slot(&self, key: &str) -> (Arc<Mutex<Slot>>, Action) {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.to_string()).or_default().clone()
        };
        let action = {
            let mut state = slot.lock();
            if state.running || state.cooling_down {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Action::Wait(rx)
            } else {
                state.running = true;
                Action::Run
            }
        };
        (slot, action)
    }

    async fn schedule<F, Fut>(
        &self,
        key: String,
        resources: Vec<String>,
        make_pass: F,
    ) -> Outcome
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<ReconcileReport>> + Send + 'static,
    {
        let (slot, action) = self.check_slot(&key);
        if let Action::Wait(rx) = action {
            debug!(key = %key, "joining queued reconcile");
            return rx.await.map_err(|_| SchedulerError::Cancelled)?;
        }

        let result = make_pass().await;

        let carried = {
            let mut state = slot.lock();
            state.running = false;
            state.cooling_down = true;
            state.waiters.drain(..).collect::<Vec<_>>()
        };

        let pass = Pass {
            run: Arc::new(move || -> PassFuture { Box::pin(make_pass()) }),
            store: self.store.clone(),
            resources,
        };
        tokio::spawn(follow_up(slot, pass, carried, self.throttle, self.disposed.clone()));

        Ok(result)
    }
}

/// Cooldown loop: after each pass, wait out the throttle, then serve
/// everyone who queued in the meantime with one more pass.
async fn follow_up(
    slot: Arc<Mutex<Slot>>,
    pass: Pass,
    mut carried: Vec<oneshot::Sender<Outcome>>,
    throttle: Duration,
    disposed: Arc<AtomicBool>,
) {
    loop {
        tokio::time::sleep(throttle).await;

        let mut waiters = std::mem::take(&mut carried);
        {
            let mut state = slot.lock();
            state.cooling_down = false;
            waiters.extend(state.waiters.drain(..));
            if !waiters.is_empty() {
                state.running = true;
            }
        }
        if waiters.is_empty() {
            return;
        }
        if disposed.load(Ordering::SeqCst) {
            for waiter in waiters {
                let _ = waiter.send(Err(SchedulerError::Disposed));
            }
            slot.lock().running = false;
            return;
        }

        let reports = pass.follow_up().await;

        carried = {
            let mut state = slot.lock();
            state.running = false;
            state.cooling_down = true;
            state.waiters.drain(..).collect()
        };
        for waiter in waiters {
            let _ = waiter.send(Ok(reports.clone()));
        }
        if carried.is_empty() {
            slot.lock().cooling_down = false;
            return;
        }
    }
}

fn slot_key(resource: &str, acting_user: Option<&str>) -> String {
    format!("{resource}:{}", acting_user.unwrap_or(""))
}
