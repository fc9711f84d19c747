//! Shared fixtures for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{OrderBackend, OrderSubmission, SubmissionReceipt};
use crate::error::{Result, SyncError};
use crate::menu::{AddonSnapshotEntry, MenuSnapshot, MenuSnapshotEntry};
use crate::models::{Addon, CustomLine, LineItem, MenuLine};
use crate::storage::{MemoryStorage, StorageAdapter};

pub fn burger(quantity: u32, cheese: u32) -> LineItem {
    LineItem::Menu(MenuLine {
        menu_id: "menu-burger".into(),
        menu_name: "Burger".into(),
        unit_price: 10.0,
        quantity,
        notes: None,
        addons: vec![Addon {
            addon_item_id: "addon-cheese".into(),
            name: "Cheese".into(),
            unit_price: 1.5,
            quantity: cheese,
        }],
    })
}

pub fn fries(quantity: u32) -> LineItem {
    LineItem::Menu(MenuLine {
        menu_id: "menu-fries".into(),
        menu_name: "Fries".into(),
        unit_price: 3.5,
        quantity,
        notes: None,
        addons: Vec::new(),
    })
}

pub fn custom(name: &str, price: f64, quantity: u32) -> LineItem {
    LineItem::Custom(CustomLine {
        custom_name: name.into(),
        custom_price: price,
        quantity,
        notes: None,
    })
}

/// Snapshot where burger, fries and cheese exist at their queued prices.
pub fn matching_snapshot() -> MenuSnapshot {
    let mut snapshot = MenuSnapshot::default();
    snapshot.menus.insert(
        "menu-burger".into(),
        MenuSnapshotEntry {
            id: "menu-burger".into(),
            name: "Burger".into(),
            effective_price: 10.0,
            is_active: true,
        },
    );
    snapshot.menus.insert(
        "menu-fries".into(),
        MenuSnapshotEntry {
            id: "menu-fries".into(),
            name: "Fries".into(),
            effective_price: 3.5,
            is_active: true,
        },
    );
    snapshot.addons.insert(
        "addon-cheese".into(),
        AddonSnapshotEntry {
            id: "addon-cheese".into(),
            name: "Cheese".into(),
            effective_price: 1.5,
            is_active: true,
        },
    );
    snapshot
}

/// Backend double: records submissions and replays scripted outcomes.
#[derive(Default)]
pub struct FakeBackend {
    pub snapshot: Mutex<Option<MenuSnapshot>>,
    pub submitted: Mutex<Vec<OrderSubmission>>,
    /// Order ids whose submission fails with a network error.
    pub failing_ids: Mutex<Vec<String>>,
    pub snapshot_fetches: Mutex<usize>,
    /// Outcomes consumed before `failing_ids` is consulted.
    pub scripted: Mutex<VecDeque<Result<SubmissionReceipt>>>,
}

impl FakeBackend {
    pub fn with_snapshot(snapshot: MenuSnapshot) -> Self {
        let backend = Self::default();
        *backend.snapshot.lock().unwrap() = Some(snapshot);
        backend
    }

    pub fn fail_order(&self, id: &str) {
        self.failing_ids.lock().unwrap().push(id.to_string());
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.offline_order_id.clone())
            .collect()
    }
}

#[async_trait]
impl OrderBackend for FakeBackend {
    async fn fetch_menu_snapshot(&self) -> Result<MenuSnapshot> {
        *self.snapshot_fetches.lock().unwrap() += 1;
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Network("Cannot reach admin dashboard".into()))
    }

    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmissionReceipt> {
        self.submitted.lock().unwrap().push(submission.clone());
        if let Some(outcome) = self.scripted.lock().unwrap().pop_front() {
            return outcome;
        }
        if self
            .failing_ids
            .lock()
            .unwrap()
            .contains(&submission.offline_order_id)
        {
            return Err(SyncError::Network("Connection timed out".into()));
        }
        Ok(SubmissionReceipt {
            success: true,
            message: None,
        })
    }
}

/// Memory storage whose next `n` reads fail, like a locked database.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing_reads: AtomicUsize,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }
}

impl StorageAdapter for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let should_fail = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SyncError::Storage("database is locked".into()));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }
}
