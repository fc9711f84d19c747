//! Engine configuration and terminal connection settings.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use serde_json::Value;

pub const PENDING_ORDERS_RECORD: &str = "pending_orders";
pub const DRAFT_CART_RECORD: &str = "draft_cart";
pub const LAST_SYNC_RECORD: &str = "last_sync";

pub const PENDING_ORDERS_SCHEMA_VERSION: u32 = 2;
pub const DRAFT_CART_SCHEMA_VERSION: u32 = 1;
pub const LAST_SYNC_SCHEMA_VERSION: u32 = 1;

fn default_namespace() -> String {
    "pos_offline".to_string()
}
fn default_retention_days() -> i64 {
    7
}
fn default_network_debounce_ms() -> u64 {
    1_500
}
fn default_menu_path() -> String {
    "/api/pos/menu".to_string()
}
fn default_orders_path() -> String {
    "/api/pos/orders".to_string()
}
fn default_health_path() -> String {
    "/api/health".to_string()
}
fn default_connectivity_poll_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub namespace: String,
    /// `None` or blank stores under the `global` scope.
    pub merchant_scope: Option<String>,
    pub retention_days: i64,
    pub network_debounce_ms: u64,
    pub admin_url: String,
    pub api_key: String,
    pub terminal_id: String,
    pub menu_path: String,
    pub orders_path: String,
    pub health_path: String,
    pub connectivity_poll_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            merchant_scope: None,
            retention_days: default_retention_days(),
            network_debounce_ms: default_network_debounce_ms(),
            admin_url: String::new(),
            api_key: String::new(),
            terminal_id: String::new(),
            menu_path: default_menu_path(),
            orders_path: default_orders_path(),
            health_path: default_health_path(),
            connectivity_poll_secs: default_connectivity_poll_secs(),
        }
    }
}

impl EngineConfig {
    pub fn for_merchant(merchant_scope: impl Into<String>) -> Self {
        Self {
            merchant_scope: Some(merchant_scope.into()),
            ..Self::default()
        }
    }

    pub fn retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.retention_days.max(0))
    }

    pub fn network_debounce(&self) -> Duration {
        Duration::from_millis(self.network_debounce_ms)
    }

    pub fn connectivity_poll_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs.max(1))
    }

    pub fn merchant_scope(&self) -> Option<&str> {
        self.merchant_scope.as_deref()
    }

    /// Fill credentials from an onboarding connection string. Plain API keys
    /// are accepted as-is.
    pub fn with_connection_string(mut self, raw: &str) -> Self {
        match decode_connection_string_payload(raw) {
            Some(payload) => {
                if let Some(key) = payload_str(&payload, &["key"]) {
                    self.api_key = key;
                }
                if let Some(url) = payload_str(&payload, &["url"]) {
                    self.admin_url = normalize_admin_url(&url);
                }
                if let Some(tid) = payload_str(&payload, &["tid", "terminalId"]) {
                    self.terminal_id = tid;
                }
            }
            None => self.api_key = raw.trim().to_string(),
        }
        self
    }
}

/// Normalise the admin dashboard URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes and a trailing `/api` segment
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn payload_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}
