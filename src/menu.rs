//! Catalog snapshot used for conflict detection.
//!
//! The menu endpoint returns nested items with addon categories; this module
//! flattens that into two id-keyed maps. Snapshots live for one sync cycle
//! and are never persisted.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq)]
pub struct MenuSnapshotEntry {
    pub id: String,
    pub name: String,
    pub effective_price: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddonSnapshotEntry {
    pub id: String,
    pub name: String,
    pub effective_price: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MenuSnapshot {
    pub menus: HashMap<String, MenuSnapshotEntry>,
    pub addons: HashMap<String, AddonSnapshotEntry>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogAddonItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    price: f64,
    #[serde(default, alias = "promo_price")]
    promo_price: Option<f64>,
    #[serde(default = "default_active", alias = "is_active")]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogAddonCategory {
    #[serde(default, alias = "addon_items")]
    addon_items: Vec<CatalogAddonItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogMenuItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    price: f64,
    #[serde(default, alias = "promo_price")]
    promo_price: Option<f64>,
    #[serde(default = "default_active", alias = "is_active")]
    is_active: bool,
    #[serde(default, alias = "addon_categories")]
    addon_categories: Vec<CatalogAddonCategory>,
}

/// Promotional price when present, otherwise the base price.
fn effective_price(price: f64, promo_price: Option<f64>) -> f64 {
    promo_price.unwrap_or(price)
}

impl MenuSnapshot {
    /// Build a snapshot from the menu endpoint response.
    ///
    /// Accepts `{ data: [...] }`, `{ menu: [...] }`, `{ items: [...] }` or a
    /// bare array. Entries that fail to parse are skipped.
    pub fn from_response(resp: &Value) -> Result<Self> {
        let items = resp
            .as_array()
            .or_else(|| resp.get("data").and_then(Value::as_array))
            .or_else(|| resp.get("menu").and_then(Value::as_array))
            .or_else(|| resp.get("items").and_then(Value::as_array))
            .or_else(|| {
                resp.get("data")
                    .and_then(|d| d.get("items"))
                    .and_then(Value::as_array)
            })
            .ok_or_else(|| SyncError::InvalidResponse("menu response missing items".into()))?;

        let mut snapshot = MenuSnapshot::default();
        for raw in items {
            let item: CatalogMenuItem = match serde_json::from_value(raw.clone()) {
                Ok(item) => item,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable menu item in snapshot");
                    continue;
                }
            };
            snapshot.insert_menu_item(item);
        }

        debug!(
            menus = snapshot.menus.len(),
            addons = snapshot.addons.len(),
            "menu snapshot flattened"
        );
        Ok(snapshot)
    }

    fn insert_menu_item(&mut self, item: CatalogMenuItem) {
        for addon in item.addon_categories.into_iter().flat_map(|c| c.addon_items) {
            // Shared addons appear under several menu items; any active
            // listing keeps the addon available.
            let entry = AddonSnapshotEntry {
                effective_price: effective_price(addon.price, addon.promo_price),
                id: addon.id.clone(),
                name: addon.name,
                is_active: addon.is_active,
            };
            self.addons
                .entry(addon.id)
                .and_modify(|existing| existing.is_active |= entry.is_active)
                .or_insert(entry);
        }

        self.menus.insert(
            item.id.clone(),
            MenuSnapshotEntry {
                effective_price: effective_price(item.price, item.promo_price),
                id: item.id,
                name: item.name,
                is_active: item.is_active,
            },
        );
    }
}
