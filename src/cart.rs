//! Draft cart persistence.
//!
//! Holds the single in-progress sale so an interrupted session can resume.
//! Independent of the pending order queue: a draft becomes a
//! [`PendingOrder`](crate::models::PendingOrder) only at checkout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{EngineConfig, DRAFT_CART_RECORD, DRAFT_CART_SCHEMA_VERSION};
use crate::error::Result;
use crate::models::{CustomerInfo, LineItem, OrderType, PendingOrder};
use crate::storage::{ScopedRecord, StorageAdapter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCart {
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerInfo>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    pub updated_at: DateTime<Utc>,
}

impl DraftCart {
    pub fn new(order_type: OrderType) -> Self {
        Self {
            order_type,
            table_number: None,
            notes: None,
            customer: None,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Finalize the draft into a queued order with a fresh id.
    pub fn into_pending_order(self) -> PendingOrder {
        let mut order = PendingOrder::new(self.order_type, self.items);
        order.table_number = self.table_number;
        order.notes = self.notes;
        order.customer = self.customer;
        order
    }
}

pub struct CartPersistence {
    record: ScopedRecord,
}

impl CartPersistence {
    pub fn new(storage: Arc<dyn StorageAdapter>, config: &EngineConfig) -> Self {
        Self {
            record: ScopedRecord::new(
                storage,
                &config.namespace,
                DRAFT_CART_RECORD,
                config.merchant_scope(),
                DRAFT_CART_SCHEMA_VERSION,
            ),
        }
    }

    /// Called on every cart mutation.
    pub fn save(&self, cart: &DraftCart) -> Result<()> {
        let mut stamped = cart.clone();
        stamped.updated_at = Utc::now();
        self.record.write(&stamped)?;
        debug!(items = stamped.items.len(), "draft cart saved");
        Ok(())
    }

    /// Resume an interrupted sale. Malformed drafts load as `None`; a
    /// storage failure is an error.
    pub fn load(&self) -> Result<Option<DraftCart>> {
        let cart: Option<DraftCart> = self.record.read()?;
        if let Some(ref c) = cart {
            info!(items = c.items.len(), updated_at = %c.updated_at, "resuming draft cart");
        }
        Ok(cart)
    }

    pub fn clear(&self) -> Result<()> {
        self.record.clear()
    }
}
