//! Conflict detection between queued orders and a live catalog snapshot.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::menu::MenuSnapshot;
use crate::models::{LineItem, OrderType, PendingOrder};

/// Prices closer than this are considered equal.
pub const PRICE_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictItem {
    #[serde(rename_all = "camelCase")]
    MenuMissing { menu_id: String, menu_name: String },
    #[serde(rename_all = "camelCase")]
    MenuInactive { menu_id: String, menu_name: String },
    #[serde(rename_all = "camelCase")]
    AddonMissing {
        menu_id: String,
        menu_name: String,
        addon_item_id: String,
        addon_name: String,
    },
    #[serde(rename_all = "camelCase")]
    PriceChanged {
        menu_id: String,
        menu_name: String,
        local_price: f64,
        server_price: f64,
    },
}

impl ConflictItem {
    /// Identity used to report each problem once per order, however many
    /// lines share the menu item.
    fn dedupe_key(&self) -> (&'static str, &str, Option<&str>) {
        match self {
            ConflictItem::MenuMissing { menu_id, .. } => ("MENU_MISSING", menu_id, None),
            ConflictItem::MenuInactive { menu_id, .. } => ("MENU_INACTIVE", menu_id, None),
            ConflictItem::AddonMissing {
                menu_id,
                addon_item_id,
                ..
            } => ("ADDON_MISSING", menu_id, Some(addon_item_id.as_str())),
            ConflictItem::PriceChanged { menu_id, .. } => ("PRICE_CHANGED", menu_id, None),
        }
    }

    pub fn menu_id(&self) -> &str {
        match self {
            ConflictItem::MenuMissing { menu_id, .. }
            | ConflictItem::MenuInactive { menu_id, .. }
            | ConflictItem::AddonMissing { menu_id, .. }
            | ConflictItem::PriceChanged { menu_id, .. } => menu_id,
        }
    }
}

/// All conflicts for one queued order, as shown to staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub order_id: String,
    pub created_at: DateTime<Utc>,
    pub order_type: OrderType,
    pub conflicts: Vec<ConflictItem>,
}

/// Compare one order against the snapshot. Custom lines carry no catalog
/// reference and are never flagged. Each conflict is reported once per
/// order, in first-seen line order.
pub fn detect(snapshot: &MenuSnapshot, order: &PendingOrder) -> Vec<ConflictItem> {
    let mut found = Vec::new();

    for item in &order.items {
        let line = match item {
            LineItem::Menu(line) => line,
            LineItem::Custom(_) => continue,
        };

        match snapshot.menus.get(&line.menu_id) {
            None => found.push(ConflictItem::MenuMissing {
                menu_id: line.menu_id.clone(),
                menu_name: line.menu_name.clone(),
            }),
            Some(entry) if !entry.is_active => found.push(ConflictItem::MenuInactive {
                menu_id: line.menu_id.clone(),
                menu_name: line.menu_name.clone(),
            }),
            Some(entry) => {
                if (entry.effective_price - line.unit_price).abs() > PRICE_TOLERANCE {
                    found.push(ConflictItem::PriceChanged {
                        menu_id: line.menu_id.clone(),
                        menu_name: line.menu_name.clone(),
                        local_price: line.unit_price,
                        server_price: entry.effective_price,
                    });
                }
            }
        }

        for addon in &line.addons {
            let available = snapshot
                .addons
                .get(&addon.addon_item_id)
                .is_some_and(|a| a.is_active);
            if !available {
                found.push(ConflictItem::AddonMissing {
                    menu_id: line.menu_id.clone(),
                    menu_name: line.menu_name.clone(),
                    addon_item_id: addon.addon_item_id.clone(),
                    addon_name: addon.name.clone(),
                });
            }
        }
    }

    let mut seen = HashSet::new();
    found.retain(|item: &ConflictItem| {
        let (kind, menu_id, addon_id) = item.dedupe_key();
        seen.insert((kind, menu_id.to_string(), addon_id.map(str::to_string)))
    });
    found
}

/// Split the queue into submittable orders and conflicts, preserving order.
pub fn partition(
    snapshot: &MenuSnapshot,
    orders: Vec<PendingOrder>,
) -> (Vec<PendingOrder>, Vec<Conflict>) {
    let mut clean = Vec::new();
    let mut conflicted = Vec::new();

    for order in orders {
        let conflicts = detect(snapshot, &order);
        if conflicts.is_empty() {
            clean.push(order);
        } else {
            conflicted.push(Conflict {
                order_id: order.id,
                created_at: order.created_at,
                order_type: order.order_type,
                conflicts,
            });
        }
    }

    (clean, conflicted)
}
