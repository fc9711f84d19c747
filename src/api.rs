//! Admin dashboard collaborators: menu snapshot and order submission.
//!
//! The sync coordinator only sees the [`OrderBackend`] trait; [`HttpBackend`]
//! is the production implementation talking to the admin dashboard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{normalize_admin_url, EngineConfig};
use crate::error::{Result, SyncError};
use crate::menu::MenuSnapshot;
use crate::models::{CustomerInfo, LineItem, OrderType, PendingOrder};

/// Order creation body. `offline_order_id` / `offline_created_at` are the
/// idempotency and audit fields; the backend is expected to dedupe on them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerInfo>,
    pub items: Vec<LineItem>,
    pub offline_order_id: String,
    pub offline_created_at: DateTime<Utc>,
}

impl From<&PendingOrder> for OrderSubmission {
    fn from(order: &PendingOrder) -> Self {
        Self {
            order_type: order.order_type,
            table_number: order.table_number.clone(),
            notes: order.notes.clone(),
            customer: order.customer.clone(),
            items: order.items.clone(),
            offline_order_id: order.id.clone(),
            offline_created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmissionReceipt {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn fetch_menu_snapshot(&self) -> Result<MenuSnapshot>;

    /// `Ok` only when the backend acknowledged the order (`success: true`).
    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmissionReceipt>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> SyncError {
    if err.is_connect() {
        return SyncError::Network(format!("Cannot reach admin dashboard at {url}"));
    }
    if err.is_timeout() {
        return SyncError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return SyncError::InvalidPayload(format!("Invalid admin dashboard URL: {url}"));
    }
    SyncError::Network(format!("Network error communicating with {url}: {err}"))
}

fn status_error(status: StatusCode, detail: Option<String>) -> SyncError {
    match status.as_u16() {
        401 => SyncError::Auth("API key is invalid or expired".to_string()),
        403 => SyncError::Auth("Terminal not authorized".to_string()),
        s => {
            let fallback = match s {
                404 => "Admin dashboard endpoint not found".to_string(),
                s if s >= 500 => "Admin dashboard server error".to_string(),
                _ => "Unexpected response from admin dashboard".to_string(),
            };
            SyncError::Server {
                status: s,
                message: detail.unwrap_or(fallback),
            }
        }
    }
}

fn error_detail(body_text: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(body_text).ok()?;
    json.get("error")
        .or_else(|| json.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
    terminal_id: String,
    menu_path: String,
    orders_path: String,
    health_path: String,
}

impl HttpBackend {
    /// No request timeout is set; the transport defaults apply.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        if config.admin_url.trim().is_empty() {
            return Err(SyncError::InvalidPayload(
                "Terminal not configured: missing admin URL".into(),
            ));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_admin_url(&config.admin_url),
            api_key: config.api_key.trim().to_string(),
            terminal_id: config.terminal_id.trim().to_string(),
            menu_path: config.menu_path.clone(),
            orders_path: config.orders_path.clone(),
            health_path: config.health_path.clone(),
        })
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let full_url = format!("{}{path}", self.base_url);
        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-POS-API-Key", &self.api_key)
            .header("x-terminal-id", &self.terminal_id)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(status_error(status, error_detail(&body_text)));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }

    /// Lightweight reachability check against the health endpoint.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}{}", self.base_url, self.health_path);
        match self
            .client
            .head(&url)
            .header("X-POS-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %friendly_error(&self.base_url, &e), "health check failed");
                false
            }
        }
    }
}

/// Interpret an order creation response body.
fn parse_receipt(resp: Value) -> Result<SubmissionReceipt> {
    let receipt: SubmissionReceipt =
        serde_json::from_value(resp).map_err(|e| SyncError::InvalidResponse(e.to_string()))?;
    if !receipt.success {
        return Err(SyncError::Rejected(
            receipt
                .message
                .unwrap_or_else(|| "no reason given".to_string()),
        ));
    }
    Ok(receipt)
}

#[async_trait]
impl OrderBackend for HttpBackend {
    async fn fetch_menu_snapshot(&self) -> Result<MenuSnapshot> {
        let resp = self.request(Method::GET, &self.menu_path, None).await?;
        MenuSnapshot::from_response(&resp)
    }

    async fn submit_order(&self, submission: &OrderSubmission) -> Result<SubmissionReceipt> {
        let body =
            serde_json::to_value(submission).map_err(|e| SyncError::InvalidPayload(e.to_string()))?;
        let resp = self
            .request(Method::POST, &self.orders_path, Some(body))
            .await?;
        let receipt = parse_receipt(resp)?;
        info!(offline_order_id = %submission.offline_order_id, "offline order accepted by admin");
        Ok(receipt)
    }
}
