//! Nayax HTTP API client.
//!
//! Bearer-token authenticated, synchronous request/response with a fixed
//! timeout and no retry. The vendor contract is loosely documented, so the
//! payload readers accept both PascalCase and snake_case field names and
//! several list wrappers.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::data_helpers::{array_payload, value_f64, value_i64, value_str};
use crate::error::AppError;
use crate::storage::mask;

/// Longest upstream body echoed back to the operator.
const MAX_ERROR_BODY_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NayaxMachine {
    pub machine_id: String,
    pub name: String,
    pub serial_number: Option<String>,
    pub status: Option<String>,
}

/// One selection (slot) of a Nayax machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NayaxProduct {
    pub selection_code: String,
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub stock: Option<i64>,
}

pub(crate) fn parse_machine(v: &Value) -> Option<NayaxMachine> {
    let machine_id = value_str(v, &["MachineID", "MachineId", "machine_id", "machineId", "id"])?;
    let name = value_str(v, &["MachineName", "machine_name", "name", "Name"])
        .unwrap_or_else(|| format!("Machine {machine_id}"));
    Some(NayaxMachine {
        machine_id,
        name,
        serial_number: value_str(
            v,
            &["MachineSerialNumber", "SerialNumber", "serial_number", "serialNumber"],
        ),
        status: value_str(v, &["MachineStatus", "Status", "status"]),
    })
}

pub(crate) fn parse_product(v: &Value) -> Option<NayaxProduct> {
    let selection_code = value_str(
        v,
        &[
            "SelectionCode",
            "selection_code",
            "selectionCode",
            "MDBCode",
            "mdb_code",
            "ButtonCode",
            "Selection",
        ],
    )?;
    let name = value_str(v, &["ProductName", "product_name", "productName", "Name", "name"])?;
    Some(NayaxProduct {
        selection_code,
        name,
        price: value_f64(v, &["CashPrice", "Price", "price", "SellingPrice", "selling_price"]),
        category: value_str(
            v,
            &["ProductGroup", "ProductCategory", "Category", "category", "group"],
        ),
        stock: value_i64(v, &["CurrentStock", "Stock", "stock", "Quantity", "quantity"]),
    })
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise a Nayax base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

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

    url
}

/// Path segments are caller-supplied machine ids; keep them to a safe set.
fn validate_path_segment(value: &str) -> Result<&str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Missing Nayax machine id".into()));
    }
    if trimmed.len() > 64
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::BadRequest(
            "Nayax machine id contains unsupported characters".into(),
        ));
    }
    Ok(trimmed)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach Nayax API at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid Nayax API URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Nayax API token is invalid or expired".to_string(),
        403 => "Nayax API token is not authorized for this resource".to_string(),
        404 => "Nayax API endpoint not found".to_string(),
        s if s >= 500 => format!("Nayax API server error (HTTP {s})"),
        s => format!("Unexpected response from Nayax API (HTTP {s})"),
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{cut}...")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of a connectivity check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct NayaxClient {
    http: Client,
}

impl NayaxClient {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Authenticated GET returning the JSON body (`Null` for empty bodies).
    async fn get_json(&self, base_url: &str, token: &str, path: &str) -> Result<Value, AppError> {
        let base = normalize_base_url(base_url);
        if base.is_empty() {
            return Err(AppError::BadRequest("Nayax base URL is not configured".into()));
        }
        let full_url = format!("{base}{path}");
        debug!(path = %path, token = %mask(token), "nayax: GET");

        let resp = self
            .http
            .get(&full_url)
            .bearer_auth(token.trim())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::Upstream(friendly_error(&base, &e)))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = if body_text.trim().is_empty() {
                format!("{} (HTTP {})", status_error(status), status.as_u16())
            } else {
                format!(
                    "{} (HTTP {}): {}",
                    status_error(status),
                    status.as_u16(),
                    truncate_body(&body_text)
                )
            };
            warn!(path = %path, status = status.as_u16(), "nayax: request failed");
            return Err(AppError::Upstream(detail));
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| AppError::Upstream(format!("Invalid JSON from Nayax API: {e}")))
    }

    pub async fn list_machines(
        &self,
        base_url: &str,
        token: &str,
    ) -> Result<Vec<NayaxMachine>, AppError> {
        let body = self.get_json(base_url, token, "/machines").await?;
        let rows = array_payload(&body, &["Machines", "machines", "items", "Items"])
            .ok_or_else(|| AppError::Upstream("Nayax machine list has an unknown shape".into()))?;
        let machines: Vec<NayaxMachine> = rows.iter().filter_map(parse_machine).collect();
        if machines.len() < rows.len() {
            warn!(
                skipped = rows.len() - machines.len(),
                "nayax: machine rows without an id were skipped"
            );
        }
        Ok(machines)
    }

    pub async fn list_machine_products(
        &self,
        base_url: &str,
        token: &str,
        machine_id: &str,
    ) -> Result<Vec<NayaxProduct>, AppError> {
        let machine_id = validate_path_segment(machine_id)?;
        let path = format!("/machines/{machine_id}/products");
        let body = self.get_json(base_url, token, &path).await?;
        let rows = array_payload(
            &body,
            &["Products", "products", "Selections", "selections", "items", "Items"],
        )
        .ok_or_else(|| AppError::Upstream("Nayax product list has an unknown shape".into()))?;
        let products: Vec<NayaxProduct> = rows.iter().filter_map(parse_product).collect();
        if products.len() < rows.len() {
            warn!(
                machine_id = %machine_id,
                skipped = rows.len() - products.len(),
                "nayax: product rows without selection code or name were skipped"
            );
        }
        Ok(products)
    }

    /// Lightweight check that the base URL and token work.
    pub async fn check_connection(&self, base_url: &str, token: &str) -> ConnectivityResult {
        let start = Instant::now();
        match self.list_machines(base_url, token).await {
            Ok(machines) => {
                let latency = start.elapsed().as_millis() as u64;
                info!(latency_ms = latency, "nayax connectivity test passed");
                ConnectivityResult {
                    success: true,
                    latency_ms: Some(latency),
                    machine_count: Some(machines.len()),
                    error: None,
                }
            }
            Err(e) => ConnectivityResult {
                success: false,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                machine_count: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// In-process stand-in for the Nayax API used by tests across modules.
#[cfg(test)]
pub mod mock {
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::get,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    pub const TOKEN: &str = "test-token-0001";

    #[derive(Default)]
    pub struct MockData {
        pub machines: Value,
        /// machine id -> products payload; machines absent here answer 500.
        pub products: HashMap<String, Value>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {TOKEN}"))
            .unwrap_or(false)
    }

    async fn machines(
        State(data): State<Arc<MockData>>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad token" })));
        }
        (StatusCode::OK, Json(data.machines.clone()))
    }

    async fn products(
        State(data): State<Arc<MockData>>,
        Path(machine_id): Path<String>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad token" })));
        }
        match data.products.get(&machine_id) {
            Some(payload) => (StatusCode::OK, Json(payload.clone())),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "machine offline" })),
            ),
        }
    }

    /// Serve `data` on an ephemeral port and return the base URL.
    pub async fn spawn(data: MockData) -> String {
        let app = Router::new()
            .route("/machines", get(machines))
            .route("/machines/:machine_id/products", get(products))
            .with_state(Arc::new(data));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock nayax");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock nayax server");
        });
        format!("http://{addr}")
    }
}
