//! Joins the manual catalog with cached Nayax inventories.
//!
//! [`UnifiedSyncEngine`] refreshes caches for tracked machines, reconciles
//! mapping status, and presents one merged inventory view.

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

use crate::db::DbState;
use crate::error::AppResult;
use crate::mapping::detector::{self, SystemProfile};
use crate::mapping::status::SyncStatus;
use crate::mapping::store::{
    list_mappings_conn, reconcile_business, MappingType, ProductMapping, ReconcileReport,
};
use crate::nayax::inventory::{
    read_all_caches_conn, refresh_all_mapped, CachedInventory, RefreshOutcome,
};
use crate::nayax::NayaxClient;
use crate::storage::SecretStore;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_items: usize,
    pub mapped_items: usize,
    pub unmapped_items: usize,
    pub synced: usize,
    pub partial: usize,
    pub unsynced: usize,
    pub coverage_pct: f64,
    pub last_refresh_at: Option<String>,
    pub system: SystemProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NayaxSide {
    pub nayax_machine_id: String,
    pub selection_code: String,
    pub mapping_type: MappingType,
    pub confidence: u8,
    pub sync_status: SyncStatus,
    pub selection_present: bool,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedItem {
    pub machine_item_id: String,
    pub machine_id: String,
    pub machine_name: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub nayax: Option<NayaxSide>,
    /// Nayax price minus manual price, when both are known.
    pub price_drift: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunReport {
    pub refreshed: Vec<RefreshOutcome>,
    pub failed: usize,
    pub reconcile: ReconcileReport,
}

pub struct UnifiedSyncEngine<'a> {
    db: &'a DbState,
    secrets: &'a dyn SecretStore,
    client: &'a NayaxClient,
    fresh_minutes: i64,
}

impl<'a> UnifiedSyncEngine<'a> {
    pub fn new(
        db: &'a DbState,
        secrets: &'a dyn SecretStore,
        client: &'a NayaxClient,
        fresh_minutes: i64,
    ) -> Self {
        Self {
            db,
            secrets,
            client,
            fresh_minutes,
        }
    }

    pub fn status_summary(&self, business_id: &str) -> AppResult<SyncSummary> {
        let system = detector::detect(self.db, self.secrets, business_id)?;
        let conn = self.db.conn.lock()?;
        let mappings = list_mappings_conn(&conn, business_id, None, self.fresh_minutes)?;
        let last_refresh_at: Option<String> = conn.query_row(
            "SELECT MAX(fetched_at) FROM nayax_inventory_cache WHERE business_id = ?1",
            params![business_id],
            |row| row.get(0),
        )?;
        drop(conn);

        let mut synced = 0;
        let mut partial = 0;
        let mut unsynced = 0;
        for m in &mappings {
            match m.sync_status {
                SyncStatus::Synced => synced += 1,
                SyncStatus::Partial => partial += 1,
                SyncStatus::Unsynced => unsynced += 1,
            }
        }
        let total_items = system.manual_item_count;
        let mapped_items = system.mapped_item_count;

        Ok(SyncSummary {
            total_items,
            mapped_items,
            unmapped_items: total_items.saturating_sub(mapped_items),
            synced,
            partial,
            unsynced,
            coverage_pct: system.mapping_coverage_pct,
            last_refresh_at,
            system,
        })
    }

    /// Every machine item with its preferred mapping and the matching cached
    /// Nayax product. Direct mappings win over smart ones.
    pub fn unified_inventory(
        &self,
        business_id: &str,
        machine_id: Option<&str>,
    ) -> AppResult<Vec<UnifiedItem>> {
        let conn = self.db.conn.lock()?;
        let mappings = list_mappings_conn(&conn, business_id, machine_id, self.fresh_minutes)?;
        let caches: HashMap<String, CachedInventory> = read_all_caches_conn(&conn, business_id)?
            .into_iter()
            .map(|c| (c.nayax_machine_id.clone(), c))
            .collect();

        let mut preferred: HashMap<String, ProductMapping> = HashMap::new();
        for mapping in mappings {
            let replace = match preferred.get(&mapping.machine_item_id) {
                None => true,
                Some(current) => {
                    current.mapping_type == MappingType::Smart
                        && mapping.mapping_type == MappingType::Direct
                }
            };
            if replace {
                preferred.insert(mapping.machine_item_id.clone(), mapping);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT mi.id, mi.machine_id, m.name, mi.name, mi.category, mi.price, mi.stock
             FROM machine_items mi
             JOIN machines m ON m.id = mi.machine_id
             WHERE mi.business_id = ?1 AND (?2 IS NULL OR mi.machine_id = ?2)
             ORDER BY m.name COLLATE NOCASE, mi.name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map(params![business_id, machine_id], |row| {
                Ok(UnifiedItem {
                    machine_item_id: row.get(0)?,
                    machine_id: row.get(1)?,
                    machine_name: row.get(2)?,
                    name: row.get(3)?,
                    category: row.get(4)?,
                    price: row.get(5)?,
                    stock: row.get(6)?,
                    nayax: None,
                    price_drift: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|mut item| {
                if let Some(m) = preferred.remove(&item.machine_item_id) {
                    let stock = caches
                        .get(&m.nayax_machine_id)
                        .and_then(|c| c.product(&m.selection_code))
                        .and_then(|p| p.stock);
                    item.price_drift = m
                        .nayax_price
                        .map(|p| ((p - item.price) * 100.0).round() / 100.0);
                    item.nayax = Some(NayaxSide {
                        nayax_machine_id: m.nayax_machine_id,
                        selection_code: m.selection_code,
                        mapping_type: m.mapping_type,
                        confidence: m.confidence,
                        sync_status: m.sync_status,
                        selection_present: m.selection_present,
                        name: m.nayax_product_name,
                        price: m.nayax_price,
                        stock,
                    });
                }
                item
            })
            .collect())
    }

    /// Refresh every tracked machine, then persist the resulting statuses.
    /// Individual refresh failures are reported, not raised.
    pub async fn run_sync(&self, business_id: &str) -> AppResult<SyncRunReport> {
        let refreshed =
            refresh_all_mapped(self.db, self.secrets, self.client, business_id).await?;
        let failed = refreshed.iter().filter(|o| !o.refreshed).count();
        let reconcile = reconcile_business(self.db, business_id, self.fresh_minutes, Utc::now())?;
        info!(
            business_id = %business_id,
            machines = refreshed.len(),
            failed,
            changed = reconcile.changed,
            "unified sync finished"
        );
        Ok(SyncRunReport {
            refreshed,
            failed,
            reconcile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, test_db};
    use crate::mapping::store::{create_mapping, NewMapping};
    use crate::nayax::api::mock;
    use crate::nayax::credentials::save_credentials;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn map(db: &DbState, item: &str, nayax: &str, sel: &str, kind: MappingType) {
        create_mapping(
            db,
            "b1",
            &NewMapping {
                machine_item_id: item.into(),
                nayax_machine_id: nayax.into(),
                selection_code: sel.into(),
                mapping_type: kind,
                confidence: Some(90),
            },
            60,
        )
        .unwrap();
    }

    fn seeded() -> DbState {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::business(&conn, "b1");
            fixtures::machine(&conn, "b1", "m1", Some("NX-1"));
            fixtures::machine_item(&conn, "b1", "m1", "i1", "Cola", 1.50);
            fixtures::machine_item(&conn, "b1", "m1", "i2", "Chips", 1.00);
            fixtures::machine_item(&conn, "b1", "m1", "i3", "Gum", 0.50);
            fixtures::inventory_cache(
                &conn,
                "b1",
                "NX-1",
                json!([
                    { "selectionCode": "A1", "name": "Coca Cola", "price": 1.75, "stock": 4 },
                    { "selectionCode": "A2", "name": "Chips", "price": 1.00 },
                    { "selectionCode": "A3", "name": "Lays", "price": 1.10 }
                ]),
                &Utc::now().to_rfc3339(),
            );
        }
        db
    }

    #[test]
    fn unified_inventory_merges_and_prefers_direct() {
        let db = seeded();
        map(&db, "i1", "NX-1", "A1", MappingType::Direct);
        map(&db, "i2", "NX-1", "A3", MappingType::Smart);
        map(&db, "i2", "NX-1", "A2", MappingType::Direct);
        let secrets = MemoryStore::default();
        let client = NayaxClient::new(Duration::from_secs(10)).unwrap();
        let engine = UnifiedSyncEngine::new(&db, &secrets, &client, 60);

        let items = engine.unified_inventory("b1", None).unwrap();
        assert_eq!(items.len(), 3);
        let cola = items.iter().find(|i| i.machine_item_id == "i1").unwrap();
        let side = cola.nayax.as_ref().unwrap();
        assert_eq!(side.stock, Some(4));
        assert_eq!(cola.price_drift, Some(0.25));

        let chips = items.iter().find(|i| i.machine_item_id == "i2").unwrap();
        assert_eq!(chips.nayax.as_ref().unwrap().selection_code, "A2");
        assert_eq!(chips.price_drift, Some(0.0));

        let gum = items.iter().find(|i| i.machine_item_id == "i3").unwrap();
        assert!(gum.nayax.is_none());
    }

    #[test]
    fn summary_counts_statuses() {
        let db = seeded();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::machine(&conn, "b1", "m2", Some("NX-2"));
            fixtures::machine_item(&conn, "b1", "m2", "i4", "Water", 1.0);
        }
        map(&db, "i1", "NX-1", "A1", MappingType::Direct);
        map(&db, "i4", "NX-2", "B1", MappingType::Direct);
        let secrets = MemoryStore::default();
        let client = NayaxClient::new(Duration::from_secs(10)).unwrap();
        let engine = UnifiedSyncEngine::new(&db, &secrets, &client, 60);

        let summary = engine.status_summary("b1").unwrap();
        assert_eq!(summary.total_items, 4);
        assert_eq!(summary.mapped_items, 2);
        assert_eq!(summary.unmapped_items, 2);
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.unsynced, 1);
        assert_eq!(summary.coverage_pct, 50.0);
        assert!(summary.last_refresh_at.is_some());
    }

    #[tokio::test]
    async fn run_sync_refreshes_then_reconciles() {
        let db = seeded();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::inventory_cache(
                &conn,
                "b1",
                "NX-1",
                json!([{ "selectionCode": "A1", "name": "Coca Cola" }]),
                "2020-01-01T00:00:00+00:00",
            );
            fixtures::machine(&conn, "b1", "m2", Some("NX-DOWN"));
        }
        map(&db, "i1", "NX-1", "A1", MappingType::Direct);

        let mut products = std::collections::HashMap::new();
        products.insert(
            "NX-1".to_string(),
            json!([{ "SelectionCode": "A1", "ProductName": "Coca Cola", "Price": 1.5 }]),
        );
        let base = mock::spawn(mock::MockData {
            machines: json!([]),
            products,
        })
        .await;
        let secrets = MemoryStore::default();
        save_credentials(&db, &secrets, "b1", &base, mock::TOKEN).unwrap();
        let client = NayaxClient::new(Duration::from_secs(10)).unwrap();
        let engine = UnifiedSyncEngine::new(&db, &secrets, &client, 60);

        let report = engine.run_sync("b1").await.unwrap();
        assert_eq!(report.refreshed.len(), 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.reconcile.checked, 1);
        assert_eq!(report.reconcile.synced, 1);

        let status: String = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT sync_status FROM product_mappings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "synced");
    }
}
