//! Classifies how a business runs its machines: a manual catalog only,
//! Nayax only, or both joined by mappings.

use rusqlite::params;
use serde::Serialize;

use crate::db::DbState;
use crate::error::AppResult;
use crate::nayax::credentials::load_credentials;
use crate::storage::SecretStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemKind {
    /// Nothing set up yet.
    Empty,
    Manual,
    Nayax,
    Unified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemSignals {
    pub machine_count: usize,
    pub manual_item_count: usize,
    pub nayax_configured: bool,
    pub nayax_machine_count: usize,
    pub cached_machine_count: usize,
    pub mapped_item_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemProfile {
    pub kind: SystemKind,
    pub machine_count: usize,
    pub manual_item_count: usize,
    pub nayax_configured: bool,
    pub nayax_machine_count: usize,
    pub cached_machine_count: usize,
    pub mapped_item_count: usize,
    /// Share of manual items with at least one mapping, 0 to 100.
    pub mapping_coverage_pct: f64,
    pub capabilities: Vec<&'static str>,
}

pub fn classify(signals: &SystemSignals) -> SystemKind {
    match (signals.manual_item_count > 0, signals.nayax_configured) {
        (true, true) => SystemKind::Unified,
        (false, true) => SystemKind::Nayax,
        (true, false) => SystemKind::Manual,
        (false, false) if signals.machine_count > 0 => SystemKind::Manual,
        (false, false) => SystemKind::Empty,
    }
}

fn capabilities(kind: SystemKind, signals: &SystemSignals) -> Vec<&'static str> {
    let mut caps = Vec::new();
    if matches!(kind, SystemKind::Manual | SystemKind::Unified) {
        caps.extend(["catalog", "voting", "promotions"]);
    }
    if matches!(kind, SystemKind::Nayax | SystemKind::Unified) {
        caps.extend(["nayax_machines", "nayax_inventory"]);
    }
    if kind == SystemKind::Unified {
        caps.push("smart_mapping");
        if signals.mapped_item_count > 0 {
            caps.push("unified_inventory");
        }
    }
    caps
}

pub fn profile(signals: SystemSignals) -> SystemProfile {
    let kind = classify(&signals);
    let coverage = if signals.manual_item_count == 0 {
        0.0
    } else {
        let pct = signals.mapped_item_count as f64 * 100.0 / signals.manual_item_count as f64;
        (pct * 10.0).round() / 10.0
    };
    SystemProfile {
        kind,
        capabilities: capabilities(kind, &signals),
        machine_count: signals.machine_count,
        manual_item_count: signals.manual_item_count,
        nayax_configured: signals.nayax_configured,
        nayax_machine_count: signals.nayax_machine_count,
        cached_machine_count: signals.cached_machine_count,
        mapped_item_count: signals.mapped_item_count,
        mapping_coverage_pct: coverage,
    }
}

/// Gather the signals for one business and classify it.
pub fn detect(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
) -> AppResult<SystemProfile> {
    let nayax_configured = load_credentials(db, secrets, business_id)?.is_some();

    let conn = db.conn.lock()?;
    let counts: (i64, i64, i64, i64, i64) = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM machines WHERE business_id = ?1),
            (SELECT COUNT(*) FROM machine_items WHERE business_id = ?1),
            (SELECT COUNT(*) FROM nayax_machines WHERE business_id = ?1),
            (SELECT COUNT(*) FROM nayax_inventory_cache WHERE business_id = ?1),
            (SELECT COUNT(DISTINCT machine_item_id) FROM product_mappings WHERE business_id = ?1)",
        params![business_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )?;

    Ok(profile(SystemSignals {
        machine_count: counts.0 as usize,
        manual_item_count: counts.1 as usize,
        nayax_configured,
        nayax_machine_count: counts.2 as usize,
        cached_machine_count: counts.3 as usize,
        mapped_item_count: counts.4 as usize,
    }))
}
