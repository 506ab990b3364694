//! Ranked mapping suggestions for unmapped machine items.
//!
//! Read-only: candidates come from the cached Nayax inventories and nothing
//! is written back.

use rusqlite::params;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::db::DbState;
use crate::error::AppResult;
use crate::mapping::similarity::{self, confidence_level, ConfidenceLevel, MatchInput};
use crate::nayax::inventory::read_all_caches_conn;

/// Candidates below this confidence are not worth showing.
pub const MIN_CONFIDENCE: u8 = 40;
pub const MAX_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub nayax_machine_id: String,
    pub selection_code: String,
    pub product_name: String,
    pub price: Option<f64>,
    pub confidence: u8,
    pub level: ConfidenceLevel,
    /// The candidate lives on the Nayax machine linked to the item's machine.
    pub same_machine: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub machine_item_id: String,
    pub item_name: String,
    pub machine_id: String,
    pub machine_name: String,
    pub price: f64,
    pub linked_nayax_machine_id: Option<String>,
    pub best_confidence: u8,
    pub candidates: Vec<Candidate>,
}

struct UnmappedItem {
    id: String,
    name: String,
    category: String,
    price: f64,
    machine_id: String,
    machine_name: String,
    nayax_machine_id: Option<String>,
}

fn rank_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| b.same_machine.cmp(&a.same_machine))
        .then_with(|| a.product_name.to_lowercase().cmp(&b.product_name.to_lowercase()))
        .then_with(|| a.selection_code.cmp(&b.selection_code))
}

/// Suggest up to [`MAX_CANDIDATES`] Nayax selections for every unmapped
/// item of the business, optionally limited to one local machine.
///
/// Selections already mapped (under any type) are not offered again.
pub fn suggest_mappings(
    db: &DbState,
    business_id: &str,
    machine_id: Option<&str>,
    min_confidence: Option<u8>,
) -> AppResult<Vec<Suggestion>> {
    let threshold = min_confidence.unwrap_or(MIN_CONFIDENCE).min(100);

    let conn = db.conn.lock()?;
    let items: Vec<UnmappedItem> = {
        let mut stmt = conn.prepare(
            "SELECT mi.id, mi.name, mi.category, mi.price, m.id, m.name, m.nayax_machine_id
             FROM machine_items mi
             JOIN machines m ON m.id = mi.machine_id
             WHERE mi.business_id = ?1
               AND (?2 IS NULL OR mi.machine_id = ?2)
               AND NOT EXISTS (SELECT 1 FROM product_mappings pm WHERE pm.machine_item_id = mi.id)
             ORDER BY mi.name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map(params![business_id, machine_id], |row| {
                Ok(UnmappedItem {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category: row.get(2)?,
                    price: row.get(3)?,
                    machine_id: row.get(4)?,
                    machine_name: row.get(5)?,
                    nayax_machine_id: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let taken: HashSet<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT nayax_machine_id, selection_code FROM product_mappings WHERE business_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![business_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashSet<_>, _>>()?;
        rows
    };

    let caches = read_all_caches_conn(&conn, business_id)?;
    drop(conn);

    let mut suggestions: Vec<Suggestion> = items
        .into_iter()
        .map(|item| {
            let manual = MatchInput::new(&item.name, Some(item.price), Some(&item.category));
            let mut candidates: Vec<Candidate> = caches
                .iter()
                .flat_map(|cache| {
                    cache.products.iter().map(move |p| (cache.nayax_machine_id.as_str(), p))
                })
                .filter(|(m, p)| !taken.contains(&(m.to_string(), p.selection_code.clone())))
                .filter_map(|(m, p)| {
                    let score = similarity::confidence(
                        &manual,
                        &MatchInput::new(&p.name, p.price, p.category.as_deref()),
                    );
                    (score >= threshold).then(|| Candidate {
                        nayax_machine_id: m.to_string(),
                        selection_code: p.selection_code.clone(),
                        product_name: p.name.clone(),
                        price: p.price,
                        confidence: score,
                        level: confidence_level(score),
                        same_machine: item.nayax_machine_id.as_deref() == Some(m),
                    })
                })
                .collect();
            candidates.sort_by(rank_candidates);
            candidates.truncate(MAX_CANDIDATES);

            Suggestion {
                best_confidence: candidates.first().map(|c| c.confidence).unwrap_or(0),
                candidates,
                machine_item_id: item.id,
                item_name: item.name,
                machine_id: item.machine_id,
                machine_name: item.machine_name,
                price: item.price,
                linked_nayax_machine_id: item.nayax_machine_id,
            }
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.best_confidence
            .cmp(&a.best_confidence)
            .then_with(|| a.item_name.to_lowercase().cmp(&b.item_name.to_lowercase()))
    });
    Ok(suggestions)
}
