//! Per-machine Nayax inventory cache.
//!
//! The cache row for (business, machine) is overwritten wholesale on every
//! successful fetch. A failed fetch leaves the previous row untouched; the
//! failure is logged and reported in the [`RefreshOutcome`] rather than
//! returned as an error, so one offline machine never aborts a batch.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{error, info, warn};

use crate::db::DbState;
use crate::error::{AppError, AppResult};
use crate::nayax::api::{NayaxClient, NayaxProduct};
use crate::nayax::credentials::require_credentials;
use crate::storage::SecretStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedInventory {
    pub nayax_machine_id: String,
    pub products: Vec<NayaxProduct>,
    pub product_count: usize,
    pub version: Option<String>,
    pub fetched_at: String,
}

impl CachedInventory {
    pub fn product(&self, selection_code: &str) -> Option<&NayaxProduct> {
        self.products
            .iter()
            .find(|p| p.selection_code == selection_code)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub nayax_machine_id: String,
    pub refreshed: bool,
    /// True when the fetched product list differs from the cached one.
    pub updated: bool,
    pub product_count: usize,
    pub fetched_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stable digest of a product list, used to tell whether a refresh changed anything.
fn compute_products_version(products: &[NayaxProduct]) -> String {
    let serialized = serde_json::to_string(products).unwrap_or_else(|_| "[]".to_string());
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

fn parse_products(raw: &str, business_id: &str, machine_id: &str) -> Vec<NayaxProduct> {
    match serde_json::from_str::<Vec<NayaxProduct>>(raw) {
        Ok(products) => products,
        Err(e) => {
            error!(
                business_id = %business_id,
                nayax_machine_id = %machine_id,
                "inventory cache JSON parse error: {e}"
            );
            vec![]
        }
    }
}

pub(crate) fn read_cache_conn(
    conn: &Connection,
    business_id: &str,
    nayax_machine_id: &str,
) -> AppResult<Option<CachedInventory>> {
    let row: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT products, version, fetched_at FROM nayax_inventory_cache
             WHERE business_id = ?1 AND nayax_machine_id = ?2",
            params![business_id, nayax_machine_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    Ok(row.map(|(raw, version, fetched_at)| {
        let products = parse_products(&raw, business_id, nayax_machine_id);
        CachedInventory {
            nayax_machine_id: nayax_machine_id.to_string(),
            product_count: products.len(),
            products,
            version,
            fetched_at,
        }
    }))
}

pub fn read_cache(
    db: &DbState,
    business_id: &str,
    nayax_machine_id: &str,
) -> AppResult<Option<CachedInventory>> {
    let conn = db.conn.lock()?;
    read_cache_conn(&conn, business_id, nayax_machine_id)
}

/// Every cached inventory of a business.
pub(crate) fn read_all_caches_conn(
    conn: &Connection,
    business_id: &str,
) -> AppResult<Vec<CachedInventory>> {
    let mut stmt = conn.prepare(
        "SELECT nayax_machine_id, products, version, fetched_at FROM nayax_inventory_cache
         WHERE business_id = ?1 ORDER BY nayax_machine_id",
    )?;
    let rows = stmt.query_map(params![business_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut caches = Vec::new();
    for row in rows {
        let (machine_id, raw, version, fetched_at) = row?;
        let products = parse_products(&raw, business_id, &machine_id);
        caches.push(CachedInventory {
            nayax_machine_id: machine_id,
            product_count: products.len(),
            products,
            version,
            fetched_at,
        });
    }
    Ok(caches)
}

/// Overwrite the cache row for (business, machine). Returns whether the
/// product list changed.
fn write_cache(
    db: &DbState,
    business_id: &str,
    nayax_machine_id: &str,
    products: &[NayaxProduct],
    fetched_at: &str,
) -> AppResult<bool> {
    let version = compute_products_version(products);
    let json_str = serde_json::to_string(products)
        .map_err(|e| AppError::Internal(format!("serialize inventory: {e}")))?;

    let conn = db.conn.lock()?;
    let previous_version: Option<String> = conn
        .query_row(
            "SELECT version FROM nayax_inventory_cache
             WHERE business_id = ?1 AND nayax_machine_id = ?2",
            params![business_id, nayax_machine_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    conn.execute(
        "INSERT INTO nayax_inventory_cache
            (business_id, nayax_machine_id, products, product_count, version, fetched_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(business_id, nayax_machine_id) DO UPDATE SET
            products = excluded.products,
            product_count = excluded.product_count,
            version = excluded.version,
            fetched_at = excluded.fetched_at",
        params![
            business_id,
            nayax_machine_id,
            json_str,
            products.len() as i64,
            version,
            fetched_at
        ],
    )?;

    Ok(previous_version.as_deref() != Some(version.as_str()))
}

/// Pull the current product list for one machine and overwrite its cache.
///
/// Missing credentials are an error; upstream failures are not.
pub async fn refresh_machine_inventory(
    db: &DbState,
    secrets: &dyn SecretStore,
    client: &NayaxClient,
    business_id: &str,
    nayax_machine_id: &str,
) -> AppResult<RefreshOutcome> {
    let auth = require_credentials(db, secrets, business_id)?;
    let outcome = refresh_with_auth(
        db,
        client,
        &auth.base_url,
        &auth.token,
        business_id,
        nayax_machine_id,
    )
    .await;
    Ok(outcome)
}

async fn refresh_with_auth(
    db: &DbState,
    client: &NayaxClient,
    base_url: &str,
    token: &str,
    business_id: &str,
    nayax_machine_id: &str,
) -> RefreshOutcome {
    let fetched = client
        .list_machine_products(base_url, token, nayax_machine_id)
        .await;

    let failed = |message: String| RefreshOutcome {
        nayax_machine_id: nayax_machine_id.to_string(),
        refreshed: false,
        updated: false,
        product_count: 0,
        fetched_at: None,
        error: Some(message),
    };

    let products = match fetched {
        Ok(products) => products,
        Err(e) => {
            warn!(
                business_id = %business_id,
                nayax_machine_id = %nayax_machine_id,
                error = %e,
                "inventory refresh failed, keeping previous cache"
            );
            return failed(e.to_string());
        }
    };

    let fetched_at = Utc::now().to_rfc3339();
    match write_cache(db, business_id, nayax_machine_id, &products, &fetched_at) {
        Ok(updated) => {
            info!(
                business_id = %business_id,
                nayax_machine_id = %nayax_machine_id,
                products = products.len(),
                updated,
                "inventory cache refreshed"
            );
            RefreshOutcome {
                nayax_machine_id: nayax_machine_id.to_string(),
                refreshed: true,
                updated,
                product_count: products.len(),
                fetched_at: Some(fetched_at),
                error: None,
            }
        }
        Err(e) => {
            error!(
                business_id = %business_id,
                nayax_machine_id = %nayax_machine_id,
                error = %e,
                "inventory cache write failed"
            );
            failed(e.to_string())
        }
    }
}

/// Nayax machines a business cares about: those referenced by a mapping or
/// linked to one of its local machines.
pub(crate) fn tracked_machine_ids(db: &DbState, business_id: &str) -> AppResult<Vec<String>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT nayax_machine_id FROM product_mappings WHERE business_id = ?1
         UNION
         SELECT nayax_machine_id FROM machines
          WHERE business_id = ?1 AND nayax_machine_id IS NOT NULL AND nayax_machine_id != ''
         ORDER BY 1",
    )?;
    let ids = stmt
        .query_map(params![business_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Refresh every tracked machine in turn.
pub async fn refresh_all_mapped(
    db: &DbState,
    secrets: &dyn SecretStore,
    client: &NayaxClient,
    business_id: &str,
) -> AppResult<Vec<RefreshOutcome>> {
    let auth = require_credentials(db, secrets, business_id)?;
    let machine_ids = tracked_machine_ids(db, business_id)?;

    let mut outcomes = Vec::with_capacity(machine_ids.len());
    for machine_id in &machine_ids {
        outcomes.push(
            refresh_with_auth(db, client, &auth.base_url, &auth.token, business_id, machine_id)
                .await,
        );
    }
    Ok(outcomes)
}
