//! JSON bridge for the POS UI.
//!
//! The renderer passes loosely shaped payloads (camelCase or snake_case,
//! bare arrays or wrapped objects); these entry points normalize them and
//! return `Result<Value, String>` ready to hand back over IPC.

use serde::Deserialize;
use tracing::info;

use crate::resolution::ConflictResolutionAction;
use crate::sync::{OrderResolution, SyncCoordinator};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CancelOrdersPayload {
    #[serde(default, alias = "order_ids", alias = "ids")]
    order_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolutionEntryPayload {
    #[serde(alias = "order_id", alias = "id")]
    order_id: String,
    #[serde(default)]
    actions: Vec<ConflictResolutionAction>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResolutionsPayload {
    #[serde(default)]
    resolutions: Vec<ResolutionEntryPayload>,
}

fn dedupe_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for id in ids {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

pub fn parse_cancel_orders_payload(arg0: Option<serde_json::Value>) -> Result<Vec<String>, String> {
    let payload = match arg0 {
        Some(serde_json::Value::Array(order_ids)) => serde_json::json!({ "orderIds": order_ids }),
        Some(serde_json::Value::String(order_id)) => serde_json::json!({ "orderIds": [order_id] }),
        Some(v) => v,
        None => serde_json::json!({}),
    };

    let parsed: CancelOrdersPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid cancel-orders payload: {e}"))?;
    let order_ids = dedupe_ids(parsed.order_ids);
    if order_ids.is_empty() {
        return Err("Missing orderIds".into());
    }
    Ok(order_ids)
}

/// Accepts `[{orderId, actions}]`, `{resolutions: [...]}` or a single
/// `{orderId, actions}`. Entries for the same order are concatenated.
pub fn parse_resolution_payload(
    arg0: Option<serde_json::Value>,
) -> Result<Vec<OrderResolution>, String> {
    let entries = match arg0 {
        Some(serde_json::Value::Array(items)) => {
            serde_json::from_value::<Vec<ResolutionEntryPayload>>(serde_json::Value::Array(items))
                .map_err(|e| format!("Invalid resolution payload: {e}"))?
        }
        Some(serde_json::Value::Object(obj)) if obj.contains_key("resolutions") => {
            serde_json::from_value::<ResolutionsPayload>(serde_json::Value::Object(obj))
                .map_err(|e| format!("Invalid resolution payload: {e}"))?
                .resolutions
        }
        Some(serde_json::Value::Object(obj)) => {
            vec![
                serde_json::from_value::<ResolutionEntryPayload>(serde_json::Value::Object(obj))
                    .map_err(|e| format!("Invalid resolution payload: {e}"))?,
            ]
        }
        _ => Vec::new(),
    };

    let mut merged: Vec<OrderResolution> = Vec::new();
    for entry in entries {
        let order_id = entry.order_id.trim().to_string();
        if order_id.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|r| r.order_id == order_id) {
            Some(existing) => existing.actions.extend(entry.actions),
            None => merged.push(OrderResolution {
                order_id,
                actions: entry.actions,
            }),
        }
    }

    if merged.is_empty() {
        return Err("Missing conflict resolutions".into());
    }
    Ok(merged)
}

pub fn sync_status_json(coordinator: &SyncCoordinator) -> serde_json::Value {
    serde_json::to_value(coordinator.status()).unwrap_or(serde_json::Value::Null)
}

pub fn sync_list_pending(coordinator: &SyncCoordinator) -> Result<serde_json::Value, String> {
    serde_json::to_value(coordinator.pending_orders()).map_err(|e| e.to_string())
}

pub async fn sync_force(coordinator: &SyncCoordinator) -> Result<serde_json::Value, String> {
    let report = coordinator.retry().await;
    serde_json::to_value(&report).map_err(|e| e.to_string())
}

pub fn sync_resolve_conflicts(
    coordinator: &SyncCoordinator,
    arg0: Option<serde_json::Value>,
) -> Result<serde_json::Value, String> {
    let resolutions = parse_resolution_payload(arg0)?;
    let applied = coordinator
        .apply_resolutions(&resolutions)
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "success": true,
        "applied": applied,
        "status": sync_status_json(coordinator),
    }))
}

pub fn sync_cancel_orders(
    coordinator: &SyncCoordinator,
    arg0: Option<serde_json::Value>,
) -> Result<serde_json::Value, String> {
    let order_ids = parse_cancel_orders_payload(arg0)?;
    let mut cancelled = Vec::new();
    for id in &order_ids {
        if coordinator.cancel(id).map_err(|e| e.to_string())? {
            cancelled.push(id.clone());
        }
    }
    info!(requested = order_ids.len(), cancelled = cancelled.len(), "cancel offline orders");
    Ok(serde_json::json!({
        "success": true,
        "cancelled": cancelled,
        "status": sync_status_json(coordinator),
    }))
}
