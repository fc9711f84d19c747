//! Queued order data model.
//!
//! Serialized camelCase with `SCREAMING_SNAKE_CASE` tags so persisted
//! payloads and submission bodies match what the POS frontend already sends.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::merge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    DineIn,
    Takeaway,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    pub addon_item_id: String,
    pub name: String,
    pub unit_price: f64,
    /// Total addon units on the line, not per menu unit.
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuLine {
    pub menu_id: String,
    pub menu_name: String,
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub addons: Vec<Addon>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomLine {
    pub custom_name: String,
    pub custom_price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineItem {
    Menu(MenuLine),
    Custom(CustomLine),
}

impl LineItem {
    pub fn quantity(&self) -> u32 {
        match self {
            LineItem::Menu(line) => line.quantity,
            LineItem::Custom(line) => line.quantity,
        }
    }

    pub fn menu_id(&self) -> Option<&str> {
        match self {
            LineItem::Menu(line) => Some(&line.menu_id),
            LineItem::Custom(_) => None,
        }
    }

    /// Line total before rounding, addons included.
    pub fn subtotal(&self) -> f64 {
        match self {
            LineItem::Menu(line) => {
                let addons: f64 = line
                    .addons
                    .iter()
                    .map(|a| a.unit_price * f64::from(a.quantity))
                    .sum();
                line.unit_price * f64::from(line.quantity) + addons
            }
            LineItem::Custom(line) => line.custom_price * f64::from(line.quantity),
        }
    }
}

/// A locally queued sale awaiting submission.
///
/// `id` doubles as the idempotency key sent to the backend, so it must
/// never change once the order is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerInfo>,
    pub items: Vec<LineItem>,
    pub total_amount: f64,
}

impl PendingOrder {
    pub fn new(order_type: OrderType, items: Vec<LineItem>) -> Self {
        let mut order = Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            order_type,
            table_number: None,
            notes: None,
            customer: None,
            items,
            total_amount: 0.0,
        };
        order.normalize();
        order
    }

    /// Merge duplicate lines and refresh the cached total.
    pub fn normalize(&mut self) {
        let items = std::mem::take(&mut self.items);
        self.items = merge::normalize(items);
        self.recalculate_total();
    }

    pub fn recalculate_total(&mut self) {
        self.total_amount = merge::compute_total(&self.items);
    }

    pub fn is_expired(&self, retention: ChronoDuration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > retention
    }
}

/// Round half-up to cents. The nudge keeps values like 1.005 from
/// landing on the wrong side of .5 after binary float error.
pub fn round_money(value: f64) -> f64 {
    let scaled = value * 100.0;
    let nudged = if scaled >= 0.0 {
        scaled + 1e-7
    } else {
        scaled - 1e-7
    };
    nudged.round() / 100.0
}
