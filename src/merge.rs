//! Line-item normalization for queued orders.
//!
//! Two lines merge when they would print identically on a ticket:
//! - menu lines: same menu id, same notes, same addons at the same
//!   per-unit quantity (two burgers with two cheese == one burger with one);
//! - custom lines: same name, same price (to the cent), same notes.
//!
//! Merged lines keep the position and prices of the first occurrence.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::models::{round_money, Addon, LineItem, MenuLine};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MergeKey {
    Menu {
        menu_id: String,
        notes: Option<String>,
        /// (addon id, numerator, denominator) of addon units per menu unit.
        addons: Vec<(String, u32, u32)>,
    },
    Custom {
        name: String,
        price_cents: i64,
        notes: Option<String>,
    },
}

fn normalized_notes(notes: &Option<String>) -> Option<String> {
    notes
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn addon_totals(addons: &[Addon]) -> BTreeMap<&str, u32> {
    let mut totals = BTreeMap::new();
    for addon in addons {
        let total = totals.entry(addon.addon_item_id.as_str()).or_insert(0u32);
        *total = total.saturating_add(addon.quantity);
    }
    totals
}

fn merge_key(item: &LineItem) -> MergeKey {
    match item {
        LineItem::Menu(line) => {
            let addons = addon_totals(&line.addons)
                .into_iter()
                .map(|(id, qty)| {
                    let divisor = gcd(qty, line.quantity).max(1);
                    (id.to_string(), qty / divisor, line.quantity / divisor)
                })
                .collect();
            MergeKey::Menu {
                menu_id: line.menu_id.clone(),
                notes: normalized_notes(&line.notes),
                addons,
            }
        }
        LineItem::Custom(line) => MergeKey::Custom {
            name: line.custom_name.trim().to_string(),
            price_cents: (round_money(line.custom_price) * 100.0).round() as i64,
            notes: normalized_notes(&line.notes),
        },
    }
}

fn absorb_menu_line(target: &mut MenuLine, incoming: MenuLine) {
    target.quantity = target.quantity.saturating_add(incoming.quantity);
    for addon in incoming.addons {
        match target
            .addons
            .iter_mut()
            .find(|a| a.addon_item_id == addon.addon_item_id)
        {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(addon.quantity);
            }
            None => target.addons.push(addon),
        }
    }
}

fn absorb(target: &mut LineItem, incoming: LineItem) {
    match (target, incoming) {
        (LineItem::Menu(target), LineItem::Menu(incoming)) => absorb_menu_line(target, incoming),
        (LineItem::Custom(target), LineItem::Custom(incoming)) => {
            target.quantity = target.quantity.saturating_add(incoming.quantity);
        }
        // Keys never match across variants.
        _ => {}
    }
}

/// Collapse lines sharing a merge key, summing quantities (addon quantities
/// included). Lines with zero quantity are dropped.
pub fn normalize(items: Vec<LineItem>) -> Vec<LineItem> {
    let mut merged: Vec<LineItem> = Vec::with_capacity(items.len());
    let mut index: HashMap<MergeKey, usize> = HashMap::new();

    for item in items {
        if item.quantity() == 0 {
            debug!(menu_id = ?item.menu_id(), "dropping zero-quantity line");
            continue;
        }
        let key = merge_key(&item);
        match index.get(&key) {
            Some(&pos) => absorb(&mut merged[pos], item),
            None => {
                index.insert(key, merged.len());
                merged.push(item);
            }
        }
    }

    merged
}

/// `Σ(unitPrice × quantity) + Σ(addon.unitPrice × addon.quantity)`,
/// rounded half-up to cents.
pub fn compute_total(items: &[LineItem]) -> f64 {
    round_money(items.iter().map(LineItem::subtotal).sum())
}
