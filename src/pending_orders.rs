//! Durable, merchant-scoped queue of orders awaiting submission.
//!
//! The in-memory list is authoritative for this terminal; every mutation is
//! written through to storage. Orders are kept in insertion order and are
//! always stored normalized.
//!
//! A store whose payload could not be read (adapter failure, not corrupt
//! data) stays unloaded: reads show an empty queue and every write is
//! refused until a later load succeeds, so stored sales are never
//! overwritten by a partial list.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, PENDING_ORDERS_RECORD, PENDING_ORDERS_SCHEMA_VERSION};
use crate::error::{Result, SyncError};
use crate::models::PendingOrder;
use crate::storage::{ScopedRecord, StorageAdapter};

pub struct PendingOrderStore {
    record: ScopedRecord,
    retention: ChronoDuration,
    orders: Vec<PendingOrder>,
    loaded: bool,
}

impl PendingOrderStore {
    /// Open the store for the configured merchant scope and load it.
    pub fn open(storage: Arc<dyn StorageAdapter>, config: &EngineConfig) -> Self {
        let record = ScopedRecord::new(
            storage,
            &config.namespace,
            PENDING_ORDERS_RECORD,
            config.merchant_scope(),
            PENDING_ORDERS_SCHEMA_VERSION,
        );
        let mut store = Self {
            record,
            retention: config.retention(),
            orders: Vec::new(),
            loaded: false,
        };
        if let Err(e) = store.load() {
            error!(key = %store.record.key(), error = %e, "offline queue unreadable; writes blocked until it loads");
        }
        store
    }

    /// Reload from storage, dropping expired orders. When anything was
    /// pruned, the pruned list is written back immediately.
    pub fn load(&mut self) -> Result<&[PendingOrder]> {
        let stored: Vec<PendingOrder> = match self.record.read() {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                self.loaded = false;
                return Err(e);
            }
        };
        let before = stored.len();
        let now = Utc::now();

        let mut kept: Vec<PendingOrder> = Vec::with_capacity(before);
        for order in stored {
            if order.is_expired(self.retention, now) {
                warn!(order_id = %order.id, created_at = %order.created_at, "purging expired offline order");
                continue;
            }
            kept.push(order);
        }
        self.orders = kept;
        self.loaded = true;

        let purged = before - self.orders.len();
        if purged > 0 {
            info!(purged, remaining = self.orders.len(), "expired offline orders purged");
            if let Err(e) = self.persist() {
                warn!(error = %e, "failed to write back pruned offline queue");
            }
        }
        Ok(&self.orders)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Retry the load if the last one failed.
    pub fn ensure_loaded(&mut self) -> Result<()> {
        if !self.loaded {
            self.load()?;
        }
        Ok(())
    }

    pub fn persist(&self) -> Result<()> {
        if !self.loaded {
            return Err(SyncError::Storage(format!(
                "offline queue {} not loaded; refusing to overwrite it",
                self.record.key()
            )));
        }
        self.record.write(&self.orders)
    }

    /// Queue an order. An order whose id is already queued has its items
    /// merged into the existing entry instead of creating a second row.
    pub fn add(&mut self, mut order: PendingOrder) -> Result<String> {
        if order.id.trim().is_empty() {
            return Err(SyncError::InvalidPayload("pending order id is empty".into()));
        }
        self.ensure_loaded()?;
        let id = order.id.clone();

        match self.orders.iter_mut().find(|o| o.id == id) {
            Some(existing) => {
                existing.items.append(&mut order.items);
                existing.normalize();
                debug!(order_id = %id, "merged items into queued order");
            }
            None => {
                order.normalize();
                self.orders.push(order);
                info!(order_id = %id, queued = self.orders.len(), "order queued offline");
            }
        }

        self.persist()?;
        Ok(id)
    }

    /// Replace a queued order, keeping its queue position.
    pub fn update(&mut self, id: &str, mut order: PendingOrder) -> Result<()> {
        self.ensure_loaded()?;
        let slot = self
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| SyncError::InvalidPayload(format!("pending order {id} not found")))?;
        order.id = id.to_string();
        order.normalize();
        *slot = order;
        self.persist()
    }

    /// Remove an order. Returns whether it was queued.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        self.ensure_loaded()?;
        let before = self.orders.len();
        self.orders.retain(|o| o.id != id);
        if self.orders.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Remove `submitted` only if the queued copy is still identical to it.
    /// A copy that changed while the submission was in flight stays queued
    /// and goes out again next cycle under the same id.
    pub fn remove_if_unchanged(&mut self, submitted: &PendingOrder) -> Result<bool> {
        self.ensure_loaded()?;
        match self.orders.iter().find(|o| o.id == submitted.id) {
            Some(current) if current == submitted => self.remove(&submitted.id),
            Some(_) => {
                warn!(order_id = %submitted.id, "order changed during submission; keeping it queued");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Explicit staff cancellation of a queued sale.
    pub fn cancel(&mut self, id: &str) -> Result<bool> {
        let removed = self.remove(id)?;
        if removed {
            info!(order_id = %id, "queued offline order cancelled by staff");
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<&PendingOrder> {
        self.orders.iter().find(|o| o.id == id)
    }

    /// Queued orders in insertion order.
    pub fn list(&self) -> Vec<PendingOrder> {
        self.orders.clone()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
