//! Persistence of product mappings between machine items and Nayax
//! selections.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{AppError, AppResult};
use crate::mapping::similarity::{self, MatchInput};
use crate::mapping::status::{derive_sync_status, parse_timestamp, SyncStatus};
use crate::nayax::inventory::{read_all_caches_conn, read_cache_conn, CachedInventory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    /// Chosen by the operator.
    Direct,
    /// Accepted from a similarity suggestion.
    Smart,
}

impl MappingType {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingType::Direct => "direct",
            MappingType::Smart => "smart",
        }
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(MappingType::Direct),
            "smart" => Ok(MappingType::Smart),
            other => Err(format!("unknown mapping type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMapping {
    pub id: String,
    pub machine_item_id: String,
    pub item_name: String,
    pub machine_id: String,
    pub nayax_machine_id: String,
    pub selection_code: String,
    pub mapping_type: MappingType,
    pub confidence: u8,
    /// Derived from the current cache age at read time.
    pub sync_status: SyncStatus,
    /// Last status written by reconciliation.
    pub stored_sync_status: SyncStatus,
    pub last_synced_at: Option<String>,
    /// Whether the selection appears in the cached inventory.
    pub selection_present: bool,
    pub nayax_product_name: Option<String>,
    pub nayax_price: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMapping {
    pub machine_item_id: String,
    pub nayax_machine_id: String,
    pub selection_code: String,
    pub mapping_type: MappingType,
    pub confidence: Option<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingWrite {
    pub mapping: ProductMapping,
    pub created: bool,
    pub updated: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: usize,
    pub changed: usize,
    pub synced: usize,
    pub partial: usize,
    pub unsynced: usize,
    pub missing_selections: usize,
}

struct MappingRow {
    id: String,
    machine_item_id: String,
    item_name: String,
    machine_id: String,
    nayax_machine_id: String,
    selection_code: String,
    mapping_type: String,
    confidence: i64,
    sync_status: String,
    last_synced_at: Option<String>,
    created_at: String,
    updated_at: String,
}

const MAPPING_SELECT: &str = "SELECT pm.id, pm.machine_item_id, mi.name, mi.machine_id,
        pm.nayax_machine_id, pm.selection_code, pm.mapping_type, pm.confidence,
        pm.sync_status, pm.last_synced_at, pm.created_at, pm.updated_at
     FROM product_mappings pm
     JOIN machine_items mi ON mi.id = pm.machine_item_id
     WHERE pm.business_id = ?1";

fn row_to_mapping(row: &rusqlite::Row<'_>) -> rusqlite::Result<MappingRow> {
    Ok(MappingRow {
        id: row.get(0)?,
        machine_item_id: row.get(1)?,
        item_name: row.get(2)?,
        machine_id: row.get(3)?,
        nayax_machine_id: row.get(4)?,
        selection_code: row.get(5)?,
        mapping_type: row.get(6)?,
        confidence: row.get(7)?,
        sync_status: row.get(8)?,
        last_synced_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn finish(
    row: MappingRow,
    cache: Option<&CachedInventory>,
    now: DateTime<Utc>,
    fresh_minutes: i64,
) -> ProductMapping {
    let product = cache.and_then(|c| c.product(&row.selection_code));
    ProductMapping {
        sync_status: derive_sync_status(cache.map(|c| c.fetched_at.as_str()), now, fresh_minutes),
        // CHECK constraints keep both columns within their enums.
        stored_sync_status: row.sync_status.parse().unwrap_or(SyncStatus::Unsynced),
        mapping_type: row.mapping_type.parse().unwrap_or(MappingType::Direct),
        confidence: row.confidence.clamp(0, 100) as u8,
        selection_present: product.is_some(),
        nayax_product_name: product.map(|p| p.name.clone()),
        nayax_price: product.and_then(|p| p.price),
        id: row.id,
        machine_item_id: row.machine_item_id,
        item_name: row.item_name,
        machine_id: row.machine_id,
        nayax_machine_id: row.nayax_machine_id,
        selection_code: row.selection_code,
        last_synced_at: row.last_synced_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

fn caches_by_machine(
    conn: &Connection,
    business_id: &str,
) -> AppResult<HashMap<String, CachedInventory>> {
    Ok(read_all_caches_conn(conn, business_id)?
        .into_iter()
        .map(|c| (c.nayax_machine_id.clone(), c))
        .collect())
}

pub(crate) fn list_mappings_conn(
    conn: &Connection,
    business_id: &str,
    machine_id: Option<&str>,
    fresh_minutes: i64,
) -> AppResult<Vec<ProductMapping>> {
    let caches = caches_by_machine(conn, business_id)?;
    let now = Utc::now();

    let sql = format!(
        "{MAPPING_SELECT} AND (?2 IS NULL OR mi.machine_id = ?2)
         ORDER BY mi.name COLLATE NOCASE, pm.mapping_type"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![business_id, machine_id], row_to_mapping)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let cache = caches.get(&row.nayax_machine_id);
            finish(row, cache, now, fresh_minutes)
        })
        .collect())
}

/// Mappings of a business, optionally limited to one local machine.
pub fn list_mappings(
    db: &DbState,
    business_id: &str,
    machine_id: Option<&str>,
    fresh_minutes: i64,
) -> AppResult<Vec<ProductMapping>> {
    let conn = db.conn.lock()?;
    list_mappings_conn(&conn, business_id, machine_id, fresh_minutes)
}

fn load_mapping(
    conn: &Connection,
    business_id: &str,
    mapping_id: &str,
    fresh_minutes: i64,
) -> AppResult<ProductMapping> {
    let row = conn
        .query_row(
            &format!("{MAPPING_SELECT} AND pm.id = ?2"),
            params![business_id, mapping_id],
            row_to_mapping,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Mapping not found".into()))?;
    let cache = read_cache_conn(conn, business_id, &row.nayax_machine_id)?;
    Ok(finish(row, cache.as_ref(), Utc::now(), fresh_minutes))
}

/// Create or update the mapping of one machine item under one type.
///
/// Repeating an existing (item, selection, type) triple is a no-op that
/// returns the stored row with `created: false`. A selection already mapped
/// to a different item under the same type is a conflict.
pub fn create_mapping(
    db: &DbState,
    business_id: &str,
    new: &NewMapping,
    fresh_minutes: i64,
) -> AppResult<MappingWrite> {
    let nayax_machine_id = new.nayax_machine_id.trim();
    let selection_code = new.selection_code.trim();
    if nayax_machine_id.is_empty() || selection_code.is_empty() {
        return Err(AppError::BadRequest(
            "Nayax machine and selection code are required".into(),
        ));
    }
    if new.confidence.is_some_and(|c| c > 100) {
        return Err(AppError::BadRequest("Confidence must be between 0 and 100".into()));
    }

    let conn = db.conn.lock()?;
    let (id, created, updated) =
        db::with_transaction(&conn, |tx| -> AppResult<(String, bool, bool)> {
            let item: Option<(String, f64, String)> = tx
                .query_row(
                    "SELECT name, price, category FROM machine_items
                     WHERE id = ?1 AND business_id = ?2",
                    params![new.machine_item_id, business_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let (item_name, item_price, item_category) =
                item.ok_or_else(|| AppError::NotFound("Machine item not found".into()))?;

            let owner: Option<String> = tx
                .query_row(
                    "SELECT machine_item_id FROM product_mappings
                     WHERE business_id = ?1 AND nayax_machine_id = ?2
                       AND selection_code = ?3 AND mapping_type = ?4",
                    params![business_id, nayax_machine_id, selection_code, new.mapping_type.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.as_deref().is_some_and(|o| o != new.machine_item_id) {
                return Err(AppError::Conflict(format!(
                    "Selection {selection_code} on {nayax_machine_id} is already mapped to another item"
                )));
            }

            let existing: Option<(String, String, String)> = tx
                .query_row(
                    "SELECT id, nayax_machine_id, selection_code FROM product_mappings
                     WHERE machine_item_id = ?1 AND mapping_type = ?2",
                    params![new.machine_item_id, new.mapping_type.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            if let Some((id, m, s)) = &existing {
                if m == nayax_machine_id && s == selection_code {
                    return Ok((id.clone(), false, false));
                }
            }

            let cache = read_cache_conn(tx, business_id, nayax_machine_id)?;
            let now = Utc::now();
            let status = derive_sync_status(
                cache.as_ref().map(|c| c.fetched_at.as_str()),
                now,
                fresh_minutes,
            );
            let last_synced_at = cache.as_ref().map(|c| c.fetched_at.clone());
            let confidence = match (new.confidence, new.mapping_type) {
                (Some(c), _) => c,
                (None, MappingType::Direct) => 100,
                (None, MappingType::Smart) => cache
                    .as_ref()
                    .and_then(|c| c.product(selection_code))
                    .map(|p| {
                        similarity::confidence(
                            &MatchInput::new(&item_name, Some(item_price), Some(&item_category)),
                            &MatchInput::new(&p.name, p.price, p.category.as_deref()),
                        )
                    })
                    .unwrap_or(0),
            };
            let now = now.to_rfc3339();

            match existing {
                Some((id, _, _)) => {
                    tx.execute(
                        "UPDATE product_mappings
                         SET nayax_machine_id = ?1, selection_code = ?2, confidence = ?3,
                             sync_status = ?4, last_synced_at = ?5, updated_at = ?6
                         WHERE id = ?7",
                        params![
                            nayax_machine_id,
                            selection_code,
                            confidence,
                            status.as_str(),
                            last_synced_at,
                            now,
                            id
                        ],
                    )?;
                    Ok((id, false, true))
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO product_mappings
                            (id, business_id, machine_item_id, nayax_machine_id, selection_code,
                             mapping_type, confidence, sync_status, last_synced_at,
                             created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                        params![
                            id,
                            business_id,
                            new.machine_item_id,
                            nayax_machine_id,
                            selection_code,
                            new.mapping_type.as_str(),
                            confidence,
                            status.as_str(),
                            last_synced_at,
                            now
                        ],
                    )?;
                    Ok((id, true, false))
                }
            }
        })?;

    if created || updated {
        info!(
            business_id = %business_id,
            mapping_id = %id,
            machine_item_id = %new.machine_item_id,
            nayax_machine_id = %nayax_machine_id,
            selection_code = %selection_code,
            mapping_type = %new.mapping_type,
            created,
            "product mapping saved"
        );
    }

    let mapping = load_mapping(&conn, business_id, &id, fresh_minutes)?;
    Ok(MappingWrite {
        mapping,
        created,
        updated,
    })
}

pub fn delete_mapping(db: &DbState, business_id: &str, mapping_id: &str) -> AppResult<()> {
    let conn = db.conn.lock()?;
    let removed = conn.execute(
        "DELETE FROM product_mappings WHERE id = ?1 AND business_id = ?2",
        params![mapping_id, business_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound("Mapping not found".into()));
    }
    info!(business_id = %business_id, mapping_id = %mapping_id, "product mapping deleted");
    Ok(())
}

/// Whether a cache fetch is more recent than the mapping's last sync.
fn is_newer(fetched_at: Option<&str>, last_synced_at: Option<&str>) -> bool {
    match (fetched_at.and_then(parse_timestamp), last_synced_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(fetched), Some(last)) => parse_timestamp(last).map_or(true, |last| fetched > last),
    }
}

/// Recompute and persist the sync status of every mapping of a business.
pub fn reconcile_business(
    db: &DbState,
    business_id: &str,
    fresh_minutes: i64,
    now: DateTime<Utc>,
) -> AppResult<ReconcileReport> {
    let conn = db.conn.lock()?;
    let report = db::with_transaction(&conn, |tx| -> AppResult<ReconcileReport> {
        let caches = caches_by_machine(tx, business_id)?;
        let rows: Vec<(String, String, String, String, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, nayax_machine_id, selection_code, sync_status, last_synced_at
                 FROM product_mappings WHERE business_id = ?1",
            )?;
            let rows = stmt
                .query_map(params![business_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut report = ReconcileReport::default();
        let stamp = now.to_rfc3339();
        for (id, machine, selection, stored, last_synced_at) in rows {
            report.checked += 1;
            let cache = caches.get(&machine);
            let status =
                derive_sync_status(cache.map(|c| c.fetched_at.as_str()), now, fresh_minutes);
            match status {
                SyncStatus::Synced => report.synced += 1,
                SyncStatus::Partial => report.partial += 1,
                SyncStatus::Unsynced => report.unsynced += 1,
            }
            if cache.is_some_and(|c| c.product(&selection).is_none()) {
                report.missing_selections += 1;
            }
            let status_changed = stored != status.as_str();
            let fetched_at = cache.map(|c| c.fetched_at.as_str());
            if status_changed {
                report.changed += 1;
            }
            if status_changed || is_newer(fetched_at, last_synced_at.as_deref()) {
                tx.execute(
                    "UPDATE product_mappings
                     SET sync_status = ?1, last_synced_at = COALESCE(?2, last_synced_at),
                         updated_at = ?3
                     WHERE id = ?4",
                    params![status.as_str(), fetched_at, stamp, id],
                )?;
            }
        }
        Ok(report)
    })?;

    info!(
        business_id = %business_id,
        checked = report.checked,
        changed = report.changed,
        "mapping sync status reconciled"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, test_db};
    use chrono::Duration;
    use serde_json::json;

    fn seeded() -> DbState {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::business(&conn, "b1");
            fixtures::business(&conn, "b2");
            fixtures::machine(&conn, "b1", "m1", Some("NX-1"));
            fixtures::machine(&conn, "b2", "m9", None);
            fixtures::machine_item(&conn, "b1", "m1", "i1", "Snickers", 1.25);
            fixtures::machine_item(&conn, "b1", "m1", "i2", "Twix", 1.25);
            fixtures::machine_item(&conn, "b2", "m9", "x1", "Cola", 1.5);
            fixtures::inventory_cache(
                &conn,
                "b1",
                "NX-1",
                json!([
                    { "selectionCode": "A1", "name": "Snickers", "price": 1.25 },
                    { "selectionCode": "A2", "name": "Twix Bar", "price": 1.30 }
                ]),
                &Utc::now().to_rfc3339(),
            );
        }
        db
    }

    fn new_mapping(item: &str, selection: &str, mapping_type: MappingType) -> NewMapping {
        NewMapping {
            machine_item_id: item.into(),
            nayax_machine_id: "NX-1".into(),
            selection_code: selection.into(),
            mapping_type,
            confidence: None,
        }
    }

    fn mapping_count(db: &DbState) -> i64 {
        db.conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM product_mappings", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn create_mapping_is_idempotent() {
        let db = seeded();
        let first = create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60)
            .unwrap();
        assert!(first.created);
        assert_eq!(first.mapping.confidence, 100);
        assert_eq!(first.mapping.sync_status, SyncStatus::Synced);
        assert_eq!(first.mapping.nayax_product_name.as_deref(), Some("Snickers"));

        let second = create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60)
            .unwrap();
        assert!(!second.created);
        assert!(!second.updated);
        assert_eq!(second.mapping.id, first.mapping.id);
        assert_eq!(mapping_count(&db), 1);
    }

    #[test]
    fn remapping_updates_in_place() {
        let db = seeded();
        let first = create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60)
            .unwrap();
        let moved = create_mapping(&db, "b1", &new_mapping("i1", "A9", MappingType::Direct), 60)
            .unwrap();
        assert!(moved.updated);
        assert_eq!(moved.mapping.id, first.mapping.id);
        assert_eq!(moved.mapping.selection_code, "A9");
        assert!(!moved.mapping.selection_present);
        assert_eq!(mapping_count(&db), 1);
    }

    #[test]
    fn selection_owned_by_other_item_conflicts() {
        let db = seeded();
        create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60).unwrap();
        let err = create_mapping(&db, "b1", &new_mapping("i2", "A1", MappingType::Direct), 60)
            .expect_err("conflict");
        assert!(matches!(err, AppError::Conflict(_)));

        // the same selection under the other type is allowed
        create_mapping(&db, "b1", &new_mapping("i2", "A1", MappingType::Smart), 60).unwrap();
    }

    #[test]
    fn smart_mapping_scores_against_cache() {
        let db = seeded();
        let write =
            create_mapping(&db, "b1", &new_mapping("i2", "A2", MappingType::Smart), 60).unwrap();
        assert!(write.mapping.confidence >= 65, "{}", write.mapping.confidence);
        assert!(write.mapping.confidence < 100);
    }

    #[test]
    fn other_business_items_are_not_found() {
        let db = seeded();
        let err = create_mapping(&db, "b1", &new_mapping("x1", "A1", MappingType::Direct), 60)
            .expect_err("foreign item");
        assert!(matches!(err, AppError::NotFound(_)));

        let mine = create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60)
            .unwrap();
        assert!(delete_mapping(&db, "b2", &mine.mapping.id).is_err());
        assert!(list_mappings(&db, "b2", None, 60).unwrap().is_empty());
        delete_mapping(&db, "b1", &mine.mapping.id).unwrap();
        assert_eq!(mapping_count(&db), 0);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let db = seeded();
        let mut bad = new_mapping("i1", " ", MappingType::Direct);
        assert!(matches!(
            create_mapping(&db, "b1", &bad, 60),
            Err(AppError::BadRequest(_))
        ));
        bad.selection_code = "A1".into();
        bad.confidence = Some(101);
        assert!(matches!(
            create_mapping(&db, "b1", &bad, 60),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn reconcile_persists_derived_status() {
        let db = seeded();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::machine(&conn, "b1", "m2", Some("NX-2"));
            fixtures::machine_item(&conn, "b1", "m2", "i3", "Water", 1.0);
        }
        create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60).unwrap();
        create_mapping(&db, "b1", &new_mapping("i2", "Z9", MappingType::Direct), 60).unwrap();
        let mut unsynced = new_mapping("i3", "C1", MappingType::Direct);
        unsynced.nayax_machine_id = "NX-2".into();
        create_mapping(&db, "b1", &unsynced, 60).unwrap();

        // three hours later the NX-1 cache is stale
        let later = Utc::now() + Duration::hours(3);
        let report = reconcile_business(&db, "b1", 60, later).unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.partial, 2);
        assert_eq!(report.unsynced, 1);
        assert_eq!(report.changed, 2);
        assert_eq!(report.missing_selections, 1);

        let stored: Vec<String> = {
            let conn = db.conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT sync_status FROM product_mappings ORDER BY sync_status")
                .unwrap();
            let rows = stmt
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            rows
        };
        assert_eq!(stored, vec!["partial", "partial", "unsynced"]);
    }

    #[test]
    fn reconcile_advances_last_synced_when_status_is_unchanged() {
        let db = seeded();
        let created =
            create_mapping(&db, "b1", &new_mapping("i1", "A1", MappingType::Direct), 60).unwrap();
        let first_sync = created.mapping.last_synced_at.clone().unwrap();

        let refreshed = (Utc::now() + Duration::minutes(10)).to_rfc3339();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::inventory_cache(
                &conn,
                "b1",
                "NX-1",
                json!([{ "selectionCode": "A1", "name": "Snickers", "price": 1.25 }]),
                &refreshed,
            );
        }
        let report =
            reconcile_business(&db, "b1", 60, Utc::now() + Duration::minutes(15)).unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.changed, 0);

        let stored: (String, String) = db
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT sync_status, last_synced_at FROM product_mappings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(stored.0, "synced");
        assert_eq!(stored.1, refreshed);
        assert_ne!(stored.1, first_sync);
    }
}
