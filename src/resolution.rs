//! Applies staff-approved conflict resolutions to queued orders.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{LineItem, PendingOrder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolutionAction {
    #[serde(rename_all = "camelCase")]
    RemoveItem { menu_id: String },
    #[serde(rename_all = "camelCase")]
    RemoveAddon {
        menu_id: String,
        addon_item_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UseServerPrice { menu_id: String, server_price: f64 },
}

fn apply_action(items: &mut Vec<LineItem>, action: &ConflictResolutionAction) {
    match action {
        ConflictResolutionAction::RemoveItem { menu_id } => {
            items.retain(|item| item.menu_id() != Some(menu_id.as_str()));
        }
        ConflictResolutionAction::RemoveAddon {
            menu_id,
            addon_item_id,
        } => {
            for item in items.iter_mut() {
                if let LineItem::Menu(line) = item {
                    if &line.menu_id == menu_id {
                        line.addons.retain(|a| &a.addon_item_id != addon_item_id);
                    }
                }
            }
        }
        ConflictResolutionAction::UseServerPrice {
            menu_id,
            server_price,
        } => {
            for item in items.iter_mut() {
                if let LineItem::Menu(line) = item {
                    if &line.menu_id == menu_id {
                        line.unit_price = *server_price;
                    }
                }
            }
        }
    }
}

/// Apply every action in turn, then re-merge lines (removing an addon can
/// make two lines identical) and recompute the total.
pub fn apply(order: &mut PendingOrder, actions: &[ConflictResolutionAction]) {
    for action in actions {
        debug!(order_id = %order.id, ?action, "applying conflict resolution");
        apply_action(&mut order.items, action);
    }
    order.normalize();
}
