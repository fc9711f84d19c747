//! Offline order sync coordinator.
//!
//! One cycle: fetch a catalog snapshot (best effort), hold back every order
//! that conflicts with it, submit the rest one by one and drop each from the
//! queue once the admin dashboard acknowledges it. Orders that fail stay
//! queued untouched and are retried with the same id next cycle.
//!
//! State machine: `IDLE → SYNCING → IDLE | IDLE_WITH_ERROR | IDLE_WITH_CONFLICTS`.
//! A single in-flight flag guarantees at most one cycle runs; triggers that
//! arrive mid-cycle are dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{OrderBackend, OrderSubmission};
use crate::cart::{CartPersistence, DraftCart};
use crate::config::{EngineConfig, LAST_SYNC_RECORD, LAST_SYNC_SCHEMA_VERSION};
use crate::conflicts::{self, Conflict};
use crate::error::{Result, SyncError};
use crate::models::PendingOrder;
use crate::network::NetworkMonitor;
use crate::pending_orders::PendingOrderStore;
use crate::resolution::{self, ConflictResolutionAction};
use crate::storage::{ScopedRecord, StorageAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    Syncing,
    IdleWithError,
    IdleWithConflicts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    NetworkRestored,
    ManualRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadySyncing,
    EmptyQueue,
    StorageUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSubmission {
    pub order_id: String,
    pub error: String,
    pub transient: bool,
}

/// Aggregated outcome of one cycle. Cycles never fail as a whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCycleReport {
    pub trigger: SyncTrigger,
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedSubmission>,
    pub conflicts: Vec<Conflict>,
    pub skipped: Option<SkipReason>,
    /// False when the snapshot fetch failed and orders went out unchecked.
    pub snapshot_checked: bool,
}

impl SyncCycleReport {
    fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            succeeded: Vec::new(),
            failed: Vec::new(),
            conflicts: Vec::new(),
            skipped: None,
            snapshot_checked: false,
        }
    }

    fn skipped(trigger: SyncTrigger, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(trigger)
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// What the POS UI shows: connectivity, queue size, last sync, conflicts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_online: bool,
    pub pending_count: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub conflicts: Vec<Conflict>,
    pub last_error: Option<String>,
}

/// Staff-approved actions for one queued order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResolution {
    pub order_id: String,
    pub actions: Vec<ConflictResolutionAction>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncCoordinator {
    store: Mutex<PendingOrderStore>,
    backend: Arc<dyn OrderBackend>,
    network: Arc<NetworkMonitor>,
    last_sync: ScopedRecord,
    in_flight: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        config: &EngineConfig,
        backend: Arc<dyn OrderBackend>,
        network: Arc<NetworkMonitor>,
    ) -> Self {
        let store = PendingOrderStore::open(storage.clone(), config);
        let last_sync = ScopedRecord::new(
            storage,
            &config.namespace,
            LAST_SYNC_RECORD,
            config.merchant_scope(),
            LAST_SYNC_SCHEMA_VERSION,
        );
        let status = SyncStatus {
            state: SyncState::Idle,
            is_online: network.is_online(),
            pending_count: store.len(),
            last_synced_at: last_sync.read().unwrap_or_else(|e| {
                warn!(error = %e, "last sync time unreadable");
                None
            }),
            conflicts: Vec::new(),
            last_error: None,
        };
        let (status, _) = watch::channel(status);

        Self {
            store: Mutex::new(store),
            backend,
            network,
            last_sync,
            in_flight: AtomicBool::new(false),
            status,
        }
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, PendingOrderStore>> {
        self.store
            .lock()
            .map_err(|e| SyncError::Storage(format!("pending order store poisoned: {e}")))
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn publish<F: FnOnce(&mut SyncStatus)>(&self, update: F) {
        let pending_count = self.lock_store().map(|s| s.len()).unwrap_or(0);
        let is_online = self.network.is_online();
        self.status.send_modify(|status| {
            update(status);
            status.pending_count = pending_count;
            status.is_online = is_online;
        });
    }

    // -----------------------------------------------------------------------
    // Queue access for the POS UI
    // -----------------------------------------------------------------------

    pub fn enqueue(&self, order: PendingOrder) -> Result<String> {
        let id = self.lock_store()?.add(order)?;
        self.publish(|_| {});
        Ok(id)
    }

    /// Queue the draft as an order, then clear the persisted draft.
    pub fn checkout(&self, cart: DraftCart, carts: &CartPersistence) -> Result<String> {
        let id = self.enqueue(cart.into_pending_order())?;
        carts.clear()?;
        Ok(id)
    }

    /// Explicit staff cancellation; also drops any conflict shown for it.
    pub fn cancel(&self, order_id: &str) -> Result<bool> {
        let removed = self.lock_store()?.cancel(order_id)?;
        if removed {
            self.publish(|status| {
                status.conflicts.retain(|c| c.order_id != order_id);
                if status.conflicts.is_empty() && status.state == SyncState::IdleWithConflicts {
                    status.state = SyncState::Idle;
                }
            });
        }
        Ok(removed)
    }

    pub fn pending_orders(&self) -> Vec<PendingOrder> {
        self.lock_store().map(|s| s.list()).unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------------

    /// Apply staff decisions and put the orders back in the clean queue.
    /// Their conflict and error state is cleared optimistically; the next
    /// cycle confirms. Returns the ids that were updated.
    pub fn apply_resolutions(&self, resolutions: &[OrderResolution]) -> Result<Vec<String>> {
        let mut applied = Vec::new();
        {
            let mut store = self.lock_store()?;
            for res in resolutions {
                let Some(mut order) = store.get(&res.order_id).cloned() else {
                    warn!(order_id = %res.order_id, "resolution for unknown order ignored");
                    continue;
                };
                resolution::apply(&mut order, &res.actions);
                store.update(&res.order_id, order)?;
                applied.push(res.order_id.clone());
            }
        }

        info!(orders = applied.len(), "conflict resolutions applied");
        self.publish(|status| {
            status.conflicts.retain(|c| !applied.contains(&c.order_id));
            if status.conflicts.is_empty() {
                status.state = SyncState::Idle;
                status.last_error = None;
            }
        });
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Sync cycle
    // -----------------------------------------------------------------------

    pub async fn retry(&self) -> SyncCycleReport {
        self.run_cycle(SyncTrigger::ManualRetry).await
    }

    pub async fn run_cycle(&self, trigger: SyncTrigger) -> SyncCycleReport {
        if !self.network.is_online() {
            debug!(?trigger, "offline; sync deferred");
            self.publish(|_| {});
            return SyncCycleReport::skipped(trigger, SkipReason::Offline);
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            info!(?trigger, "sync already in flight; trigger dropped");
            return SyncCycleReport::skipped(trigger, SkipReason::AlreadySyncing);
        };

        let loaded = self.lock_store().and_then(|mut store| {
            store.ensure_loaded()?;
            Ok(store.list())
        });
        let orders = match loaded {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "cannot read pending orders; sync skipped");
                let message = e.to_string();
                self.publish(move |status| {
                    status.state = SyncState::IdleWithError;
                    status.last_error = Some(message);
                });
                return SyncCycleReport::skipped(trigger, SkipReason::StorageUnavailable);
            }
        };
        if orders.is_empty() {
            self.publish(|status| {
                status.state = SyncState::Idle;
                status.conflicts.clear();
                status.last_error = None;
            });
            return SyncCycleReport::skipped(trigger, SkipReason::EmptyQueue);
        }

        info!(?trigger, pending = orders.len(), "sync cycle started");
        self.publish(|status| status.state = SyncState::Syncing);

        let mut report = SyncCycleReport::new(trigger);

        // Fail open: without a snapshot, orders go out at their queued prices.
        let (clean, conflicted) = match self.backend.fetch_menu_snapshot().await {
            Ok(snapshot) => {
                report.snapshot_checked = true;
                conflicts::partition(&snapshot, orders)
            }
            Err(e) => {
                warn!(error = %e, "menu snapshot unavailable; skipping conflict detection");
                (orders, Vec::new())
            }
        };

        for conflict in &conflicted {
            info!(
                order_id = %conflict.order_id,
                conflicts = conflict.conflicts.len(),
                "order held back for staff review"
            );
        }
        report.conflicts = conflicted;

        for order in clean {
            let submission = OrderSubmission::from(&order);
            match self.backend.submit_order(&submission).await {
                Ok(_) => {
                    if let Err(e) = self
                        .lock_store()
                        .and_then(|mut store| store.remove_if_unchanged(&order))
                    {
                        warn!(order_id = %order.id, error = %e, "synced order could not be removed from storage");
                    }
                    report.succeeded.push(order.id);
                }
                Err(e) => {
                    if e.is_auth_failure() {
                        error!(order_id = %order.id, error = %e, "order sync rejected: terminal authorization");
                    } else {
                        warn!(order_id = %order.id, error = %e, "order sync failed; will retry");
                    }
                    report.failed.push(FailedSubmission {
                        order_id: order.id,
                        transient: e.is_transient(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let last_synced_at = if report.attempted() > 0 {
            let now = Utc::now();
            if let Err(e) = self.last_sync.write(&now) {
                warn!(error = %e, "failed to persist last sync time");
            }
            Some(now)
        } else {
            None
        };

        let (state, last_error) = if !report.conflicts.is_empty() {
            (SyncState::IdleWithConflicts, failure_summary(&report))
        } else if !report.failed.is_empty() {
            (SyncState::IdleWithError, failure_summary(&report))
        } else {
            (SyncState::Idle, None)
        };

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            conflicts = report.conflicts.len(),
            state = ?state,
            "sync cycle complete"
        );

        let conflicts = report.conflicts.clone();
        self.publish(move |status| {
            status.state = state;
            status.conflicts = conflicts;
            status.last_error = last_error;
            if last_synced_at.is_some() {
                status.last_synced_at = last_synced_at;
            }
        });

        report
    }

    /// Start the trigger dispatcher and send the startup trigger.
    ///
    /// Each trigger runs a cycle on its own task; the in-flight guard drops
    /// the ones that overlap.
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncTrigger>();
        self.network.set_trigger_sender(tx.clone());

        let coordinator = self.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(trigger) = rx.recv().await {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.run_cycle(trigger).await;
                });
            }
        });

        let coordinator = self.clone();
        let mut online_rx = self.network.subscribe();
        let watcher = tokio::spawn(async move {
            while online_rx.changed().await.is_ok() {
                coordinator.publish(|_| {});
            }
        });

        let _ = tx.send(SyncTrigger::Startup);
        SyncHandle {
            tx,
            tasks: vec![dispatcher, watcher],
        }
    }
}

fn failure_summary(report: &SyncCycleReport) -> Option<String> {
    if report.failed.is_empty() {
        return None;
    }
    Some(format!(
        "{} order(s) could not be synced and will be retried",
        report.failed.len()
    ))
}

/// Handle to the running trigger dispatcher. Dropping it stops the tasks.
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncTrigger>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn trigger(&self, trigger: SyncTrigger) {
        let _ = self.tx.send(trigger);
    }

    pub fn retry(&self) {
        self.trigger(SyncTrigger::ManualRetry);
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SubmissionReceipt;
    use crate::conflicts::ConflictItem;
    use crate::menu::MenuSnapshot;
    use crate::models::OrderType;
    use crate::network::FixedConnectivity;
    use crate::storage::MemoryStorage;
    use crate::test_support::{burger, custom, fries, matching_snapshot, FakeBackend, FlakyStorage};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tokio::sync::Notify;

    const DEBOUNCE: Duration = Duration::from_millis(1500);

    struct Harness {
        storage: Arc<MemoryStorage>,
        backend: Arc<FakeBackend>,
        network: Arc<NetworkMonitor>,
        coordinator: Arc<SyncCoordinator>,
    }

    fn harness_with(storage: Arc<MemoryStorage>, backend: FakeBackend, online: bool) -> Harness {
        let backend = Arc::new(backend);
        let network = Arc::new(NetworkMonitor::new(&FixedConnectivity(online), DEBOUNCE));
        let coordinator = Arc::new(SyncCoordinator::new(
            storage.clone(),
            &EngineConfig::for_merchant("m1"),
            backend.clone(),
            network.clone(),
        ));
        Harness {
            storage,
            backend,
            network,
            coordinator,
        }
    }

    fn harness(online: bool) -> Harness {
        harness_with(
            Arc::new(MemoryStorage::new()),
            FakeBackend::with_snapshot(matching_snapshot()),
            online,
        )
    }

    fn queue(h: &Harness, items: Vec<crate::models::LineItem>) -> String {
        h.coordinator
            .enqueue(PendingOrder::new(OrderType::DineIn, items))
            .unwrap()
    }

    #[tokio::test]
    async fn test_offline_cycle_is_noop() {
        let h = harness(false);
        queue(&h, vec![burger(1, 1)]);
        let report = h.coordinator.run_cycle(SyncTrigger::ManualRetry).await;
        assert_eq!(report.skipped, Some(SkipReason::Offline));
        assert_eq!(*h.backend.snapshot_fetches.lock().unwrap(), 0);
        assert_eq!(h.coordinator.status().pending_count, 1);
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let h = harness(true);
        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.skipped, Some(SkipReason::EmptyQueue));
        assert_eq!(*h.backend.snapshot_fetches.lock().unwrap(), 0);
        assert_eq!(h.coordinator.status().last_synced_at, None);
    }

    #[tokio::test]
    async fn test_submits_clean_and_holds_conflicted() {
        let mut snapshot = matching_snapshot();
        snapshot.menus.remove("menu-fries");
        let h = harness_with(
            Arc::new(MemoryStorage::new()),
            FakeBackend::with_snapshot(snapshot),
            true,
        );
        let clean = queue(&h, vec![burger(1, 1)]);
        let conflicted = queue(&h, vec![fries(2)]);
        let before = h.coordinator.pending_orders()[1].clone();

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;

        assert_eq!(report.succeeded, vec![clean.clone()]);
        assert_eq!(h.backend.submitted_ids(), vec![clean]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].order_id, conflicted);
        assert!(matches!(
            report.conflicts[0].conflicts.as_slice(),
            [ConflictItem::MenuMissing { menu_id, .. }] if menu_id == "menu-fries"
        ));
        assert_eq!(h.coordinator.pending_orders(), vec![before]);

        let status = h.coordinator.status();
        assert_eq!(status.state, SyncState::IdleWithConflicts);
        assert_eq!(status.pending_count, 1);
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_submission_carries_client_id_and_timestamp() {
        let h = harness(true);
        let id = queue(&h, vec![custom("Corkage", 5.0, 1)]);
        let created_at = h.coordinator.pending_orders()[0].created_at;
        h.coordinator.run_cycle(SyncTrigger::Startup).await;

        let submitted = h.backend.submitted.lock().unwrap();
        assert_eq!(submitted[0].offline_order_id, id);
        assert_eq!(submitted[0].offline_created_at, created_at);
    }

    #[tokio::test]
    async fn test_snapshot_failure_fails_open() {
        let h = harness_with(Arc::new(MemoryStorage::new()), FakeBackend::default(), true);
        // Would conflict on any snapshot: menu id unknown everywhere.
        let mut item = fries(1);
        if let crate::models::LineItem::Menu(line) = &mut item {
            line.menu_id = "menu-retired".into();
        }
        let id = queue(&h, vec![item]);

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert!(!report.snapshot_checked);
        assert_eq!(report.succeeded, vec![id]);
        assert!(h.coordinator.pending_orders().is_empty());
        assert_eq!(h.coordinator.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_failed_submission_retained_and_retried_with_same_id() {
        let h = harness(true);
        let first = queue(&h, vec![burger(1, 1)]);
        let second = queue(&h, vec![fries(1)]);
        h.backend.fail_order(&first);
        let before = h.coordinator.pending_orders()[0].clone();

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.succeeded, vec![second.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].transient);
        assert_eq!(h.coordinator.pending_orders(), vec![before]);

        let status = h.coordinator.status();
        assert_eq!(status.state, SyncState::IdleWithError);
        assert!(status.last_error.is_some());

        h.backend.failing_ids.lock().unwrap().clear();
        let report = h.coordinator.retry().await;
        assert_eq!(report.succeeded, vec![first.clone()]);
        assert_eq!(h.backend.submitted_ids(), vec![first.clone(), second, first]);
        assert_eq!(h.coordinator.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_conflicts_take_precedence_over_errors() {
        let mut snapshot = matching_snapshot();
        snapshot.menus.get_mut("menu-fries").unwrap().is_active = false;
        let h = harness_with(
            Arc::new(MemoryStorage::new()),
            FakeBackend::with_snapshot(snapshot),
            true,
        );
        let failing = queue(&h, vec![burger(1, 1)]);
        queue(&h, vec![fries(1)]);
        h.backend.fail_order(&failing);

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(h.coordinator.status().state, SyncState::IdleWithConflicts);
    }

    #[tokio::test]
    async fn test_auth_failure_is_generic_error() {
        let h = harness(true);
        queue(&h, vec![burger(1, 1)]);
        h.backend
            .scripted
            .lock()
            .unwrap()
            .push_back(Err(SyncError::Auth("API key is invalid or expired".into())));

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert!(!report.failed[0].transient);
        let status = h.coordinator.status();
        assert_eq!(status.state, SyncState::IdleWithError);
        assert_eq!(
            status.last_error.as_deref(),
            Some("1 order(s) could not be synced and will be retried")
        );
        assert_eq!(status.pending_count, 1);
    }

    #[tokio::test]
    async fn test_rejected_order_stays_queued() {
        let h = harness(true);
        queue(&h, vec![burger(1, 1)]);
        h.backend
            .scripted
            .lock()
            .unwrap()
            .push_back(Err(SyncError::Rejected("branch closed".into())));
        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(h.coordinator.pending_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_last_sync_survives_reload() {
        let storage = Arc::new(MemoryStorage::new());
        let h = harness_with(
            storage.clone(),
            FakeBackend::with_snapshot(matching_snapshot()),
            true,
        );
        queue(&h, vec![burger(1, 1)]);
        h.coordinator.run_cycle(SyncTrigger::Startup).await;
        let synced_at = h.coordinator.status().last_synced_at;
        assert!(synced_at.is_some());

        let reloaded = harness_with(storage, FakeBackend::default(), true);
        assert_eq!(reloaded.coordinator.status().last_synced_at, synced_at);
    }

    #[tokio::test]
    async fn test_expired_orders_never_submitted() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let mut store =
                PendingOrderStore::open(storage.clone(), &EngineConfig::for_merchant("m1"));
            let mut stale = PendingOrder::new(OrderType::DineIn, vec![burger(1, 1)]);
            stale.created_at = Utc::now() - ChronoDuration::days(10);
            store.add(stale).unwrap();
        }
        let h = harness_with(
            storage,
            FakeBackend::with_snapshot(matching_snapshot()),
            true,
        );
        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.skipped, Some(SkipReason::EmptyQueue));
        assert!(h.backend.submitted_ids().is_empty());
    }

    #[tokio::test]
    async fn test_apply_resolutions_clears_conflicts_then_submits() {
        let mut snapshot = matching_snapshot();
        snapshot.menus.get_mut("menu-burger").unwrap().effective_price = 12.0;
        let h = harness_with(
            Arc::new(MemoryStorage::new()),
            FakeBackend::with_snapshot(snapshot),
            true,
        );
        let id = queue(&h, vec![burger(2, 2)]);

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.conflicts.len(), 1);

        let applied = h
            .coordinator
            .apply_resolutions(&[OrderResolution {
                order_id: id.clone(),
                actions: vec![ConflictResolutionAction::UseServerPrice {
                    menu_id: "menu-burger".into(),
                    server_price: 12.0,
                }],
            }])
            .unwrap();
        assert_eq!(applied, vec![id.clone()]);

        let status = h.coordinator.status();
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.conflicts.is_empty());
        assert_eq!(h.coordinator.pending_orders()[0].total_amount, 27.0);

        let report = h.coordinator.retry().await;
        assert_eq!(report.succeeded, vec![id]);
        assert!(report.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_removes_order_and_conflict() {
        let mut snapshot = matching_snapshot();
        snapshot.menus.clear();
        let h = harness_with(
            Arc::new(MemoryStorage::new()),
            FakeBackend::with_snapshot(snapshot),
            true,
        );
        let id = queue(&h, vec![burger(1, 1)]);
        h.coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(h.coordinator.status().state, SyncState::IdleWithConflicts);

        assert!(h.coordinator.cancel(&id).unwrap());
        let status = h.coordinator.status();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.pending_count, 0);
        assert_eq!(
            h.storage.get("pos_offline:pending_orders:m1:v2").unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn test_checkout_clears_draft() {
        let h = harness(false);
        let carts = CartPersistence::new(h.storage.clone(), &EngineConfig::for_merchant("m1"));
        let mut cart = DraftCart::new(OrderType::Takeaway);
        cart.items = vec![fries(1)];
        carts.save(&cart).unwrap();

        let id = h.coordinator.checkout(cart, &carts).unwrap();
        assert!(carts.load().unwrap().is_none());
        assert_eq!(h.coordinator.pending_orders()[0].id, id);
    }

    #[derive(PartialEq)]
    enum Hold {
        Snapshot,
        Submit,
    }

    /// Blocks the chosen call until the test releases the gate.
    struct GatedBackend {
        inner: FakeBackend,
        gate: Arc<Notify>,
        hold: Hold,
    }

    #[async_trait]
    impl OrderBackend for GatedBackend {
        async fn fetch_menu_snapshot(&self) -> Result<MenuSnapshot> {
            if self.hold == Hold::Snapshot {
                self.gate.notified().await;
            }
            self.inner.fetch_menu_snapshot().await
        }

        async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmissionReceipt> {
            if self.hold == Hold::Submit {
                self.gate.notified().await;
            }
            self.inner.submit_order(submission).await
        }
    }

    fn gated(hold: Hold) -> (Arc<GatedBackend>, Arc<Notify>, SyncCoordinator) {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(GatedBackend {
            inner: FakeBackend::with_snapshot(matching_snapshot()),
            gate: gate.clone(),
            hold,
        });
        let network = Arc::new(NetworkMonitor::new(&FixedConnectivity(true), DEBOUNCE));
        let coordinator = SyncCoordinator::new(
            Arc::new(MemoryStorage::new()),
            &EngineConfig::default(),
            backend.clone(),
            network,
        );
        (backend, gate, coordinator)
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_dropped() {
        let (backend, gate, coordinator) = gated(Hold::Snapshot);
        coordinator
            .enqueue(PendingOrder::new(OrderType::DineIn, vec![burger(1, 1)]))
            .unwrap();

        let (first, second) = tokio::join!(
            coordinator.run_cycle(SyncTrigger::Startup),
            async {
                let report = coordinator.run_cycle(SyncTrigger::ManualRetry).await;
                assert_eq!(coordinator.status().state, SyncState::Syncing);
                gate.notify_one();
                report
            }
        );

        assert_eq!(second.skipped, Some(SkipReason::AlreadySyncing));
        assert_eq!(first.succeeded.len(), 1);
        assert_eq!(backend.inner.submitted_ids().len(), 1);
        assert_eq!(coordinator.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_items_merged_during_submission_stay_queued() {
        let (backend, gate, coordinator) = gated(Hold::Submit);
        let id = coordinator
            .enqueue(PendingOrder::new(OrderType::DineIn, vec![burger(1, 1)]))
            .unwrap();
        let queued = coordinator.pending_orders()[0].clone();

        let (report, ()) = tokio::join!(coordinator.run_cycle(SyncTrigger::Startup), async {
            let mut more = queued.clone();
            more.items = vec![fries(1)];
            coordinator.enqueue(more).unwrap();
            gate.notify_one();
        });

        assert_eq!(report.succeeded, vec![id.clone()]);
        assert_eq!(backend.inner.submitted.lock().unwrap()[0].items.len(), 1);
        let pending = coordinator.pending_orders();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].items.len(), 2);
        assert_eq!(coordinator.status().pending_count, 1);

        // Next cycle resends the whole order under the same id.
        let (report, ()) = tokio::join!(coordinator.retry(), async { gate.notify_one() });
        assert_eq!(report.succeeded, vec![id.clone()]);
        let submitted = backend.inner.submitted.lock().unwrap();
        assert_eq!(submitted[1].offline_order_id, id);
        assert_eq!(submitted[1].items.len(), 2);
        drop(submitted);
        assert!(coordinator.pending_orders().is_empty());
    }

    #[tokio::test]
    async fn test_order_with_one_bad_line_is_held_back_whole() {
        let mut snapshot = matching_snapshot();
        snapshot.menus.remove("menu-fries");
        let h = harness_with(
            Arc::new(MemoryStorage::new()),
            FakeBackend::with_snapshot(snapshot),
            true,
        );
        let mut salted = fries(1);
        if let crate::models::LineItem::Menu(line) = &mut salted {
            line.notes = Some("extra salt".into());
        }
        let mixed = queue(&h, vec![burger(2, 2), fries(1), salted, custom("Corkage", 5.0, 1)]);
        let clean = queue(&h, vec![burger(1, 1)]);

        let report = h.coordinator.run_cycle(SyncTrigger::Startup).await;

        assert_eq!(h.backend.submitted_ids(), vec![clean]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].order_id, mixed);
        assert_eq!(
            report.conflicts[0].conflicts,
            vec![ConflictItem::MenuMissing {
                menu_id: "menu-fries".into(),
                menu_name: "Fries".into(),
            }]
        );
        let pending = h.coordinator.pending_orders();
        assert_eq!(pending[0].id, mixed);
        assert_eq!(pending[0].items.len(), 4);
    }

    #[tokio::test]
    async fn test_unreadable_queue_skips_cycle_without_losing_orders() {
        let storage = Arc::new(FlakyStorage::new());
        let config = EngineConfig::for_merchant("m1");
        let id = PendingOrderStore::open(storage.clone(), &config)
            .add(PendingOrder::new(OrderType::DineIn, vec![burger(1, 1)]))
            .unwrap();

        // Queue load, last sync read, the enqueue's reload, the cycle's reload.
        storage.fail_next_reads(4);
        let backend = Arc::new(FakeBackend::with_snapshot(matching_snapshot()));
        let network = Arc::new(NetworkMonitor::new(&FixedConnectivity(true), DEBOUNCE));
        let coordinator =
            SyncCoordinator::new(storage.clone(), &config, backend.clone(), network);
        assert!(coordinator
            .enqueue(PendingOrder::new(OrderType::Takeaway, vec![fries(1)]))
            .is_err());

        let report = coordinator.run_cycle(SyncTrigger::Startup).await;
        assert_eq!(report.skipped, Some(SkipReason::StorageUnavailable));
        assert_eq!(coordinator.status().state, SyncState::IdleWithError);
        assert!(backend.submitted_ids().is_empty());

        let report = coordinator.retry().await;
        assert_eq!(report.succeeded, vec![id]);
        assert_eq!(coordinator.status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_spawn_runs_startup_cycle() {
        let h = harness(true);
        queue(&h, vec![burger(1, 1)]);
        let mut rx = h.coordinator.subscribe();
        let _handle = h.coordinator.spawn();

        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.pending_count == 0 && s.state == SyncState::Idle),
        )
        .await
        .expect("startup cycle finished")
        .expect("status channel open");
        assert_eq!(h.backend.submitted_ids().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_restore_triggers_debounced_sync() {
        let h = harness(false);
        queue(&h, vec![burger(1, 1)]);
        let mut rx = h.coordinator.subscribe();
        let _handle = h.coordinator.spawn();

        // Startup trigger lands while offline.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.backend.submitted_ids().is_empty());

        h.network.handle_connectivity_change(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.backend.submitted_ids().is_empty());

        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.pending_count == 0 && s.is_online),
        )
        .await
        .expect("restore sync finished")
        .expect("status channel open");
        assert_eq!(h.backend.submitted_ids().len(), 1);
    }
}
