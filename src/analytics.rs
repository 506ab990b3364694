//! Operator dashboard figures.

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use tracing::debug;

use crate::db::DbState;
use crate::error::AppResult;
use crate::mapping::detector::{self, SystemKind};
use crate::mapping::store::list_mappings;
use crate::mapping::SyncStatus;
use crate::storage::SecretStore;
use crate::voting::{self, ItemVotes};

const VOTE_WINDOW_DAYS: i64 = 7;
const TOP_ITEMS: usize = 5;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingCounts {
    pub total: usize,
    pub synced: usize,
    pub partial: usize,
    pub unsynced: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub machine_count: i64,
    pub item_count: i64,
    pub total_stock: i64,
    pub inventory_value: f64,
    pub mappings: MappingCounts,
    pub votes_in: i64,
    pub votes_out: i64,
    pub vote_window_days: i64,
    pub top_items: Vec<ItemVotes>,
    pub active_ads: i64,
    pub active_discounts: i64,
    pub active_promotions: i64,
    pub system_kind: SystemKind,
}

fn count_mappings(statuses: impl IntoIterator<Item = SyncStatus>) -> MappingCounts {
    statuses
        .into_iter()
        .fold(MappingCounts::default(), |mut counts, status| {
            counts.total += 1;
            match status {
                SyncStatus::Synced => counts.synced += 1,
                SyncStatus::Partial => counts.partial += 1,
                SyncStatus::Unsynced => counts.unsynced += 1,
            }
            counts
        })
}

pub fn dashboard(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
    fresh_minutes: i64,
) -> AppResult<Dashboard> {
    let now = Utc::now().to_rfc3339();
    let (machine_count, item_count, total_stock, inventory_value, active_ads, active_discounts) = {
        let conn = db.conn.lock()?;
        conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM machines WHERE business_id = ?1),
                (SELECT COUNT(*) FROM machine_items WHERE business_id = ?1),
                (SELECT COALESCE(SUM(stock), 0) FROM machine_items WHERE business_id = ?1),
                (SELECT COALESCE(SUM(price * stock), 0.0) FROM machine_items WHERE business_id = ?1),
                (SELECT COUNT(*) FROM promotional_ads
                  WHERE business_id = ?1 AND is_active = 1
                    AND (starts_at IS NULL OR starts_at <= ?2)
                    AND (ends_at IS NULL OR ends_at > ?2)),
                (SELECT COUNT(*) FROM discounts
                  WHERE business_id = ?1 AND is_active = 1
                    AND (starts_at IS NULL OR starts_at <= ?2)
                    AND (expires_at IS NULL OR expires_at > ?2)
                    AND (max_uses IS NULL OR uses < max_uses))",
            params![business_id, now],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )?
    };

    let mappings = count_mappings(
        list_mappings(db, business_id, None, fresh_minutes)?
            .into_iter()
            .map(|m| m.sync_status),
    );

    let votes = voting::vote_analytics(db, business_id, VOTE_WINDOW_DAYS, None)?;
    let system = detector::detect(db, secrets, business_id)?;

    debug!(
        business_id = %business_id,
        machines = machine_count,
        mappings = mappings.total,
        "dashboard computed"
    );

    Ok(Dashboard {
        machine_count,
        item_count,
        total_stock,
        inventory_value: (inventory_value * 100.0).round() / 100.0,
        mappings,
        votes_in: votes.total_in,
        votes_out: votes.total_out,
        vote_window_days: votes.days,
        top_items: votes.items.into_iter().take(TOP_ITEMS).collect(),
        active_ads,
        active_discounts,
        active_promotions: active_ads + active_discounts,
        system_kind: system.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, test_db};
    use crate::mapping::store::{create_mapping, NewMapping};
    use crate::mapping::MappingType;
    use crate::promotions::{self, DiscountKind, NewAd, NewDiscount};
    use crate::storage::MemoryStore;
    use crate::voting::{record_vote, VoteType};
    use serde_json::json;

    #[test]
    fn empty_business_has_zeroed_dashboard() {
        let db = test_db();
        fixtures::business(&db.conn.lock().unwrap(), "b1");
        let board = dashboard(&db, &MemoryStore::default(), "b1", 60).unwrap();
        assert_eq!(board.machine_count, 0);
        assert_eq!(board.inventory_value, 0.0);
        assert_eq!(board.mappings.total, 0);
        assert!(board.top_items.is_empty());
        assert_eq!(board.system_kind, SystemKind::Empty);
    }

    #[test]
    fn dashboard_aggregates_business_activity() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::business(&conn, "b1");
            fixtures::business(&conn, "b2");
            fixtures::machine(&conn, "b1", "m1", Some("nx-1"));
            fixtures::machine(&conn, "b2", "m9", None);
            fixtures::machine_item(&conn, "b1", "m1", "i1", "Cola", 2.0);
            fixtures::machine_item(&conn, "b1", "m1", "i2", "Chips", 1.5);
            fixtures::machine_item(&conn, "b2", "m9", "i9", "Gum", 9.0);
            fixtures::inventory_cache(
                &conn,
                "b1",
                "nx-1",
                json!([{"selectionCode": "A1", "name": "Cola", "price": 2.0}]),
                &Utc::now().to_rfc3339(),
            );
            conn.execute(
                "INSERT INTO voting_lists (id, business_id, machine_id, name, created_at)
                 VALUES ('vl1', 'b1', 'm1', 'm1 voting', datetime('now'))",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO voting_list_items (id, voting_list_id, machine_item_id, name, created_at)
                 VALUES ('v1', 'vl1', 'i1', 'Cola', datetime('now'))",
                [],
            )
            .unwrap();
        }
        create_mapping(
            &db,
            "b1",
            &NewMapping {
                machine_item_id: "i1".into(),
                nayax_machine_id: "nx-1".into(),
                selection_code: "A1".into(),
                mapping_type: MappingType::Direct,
                confidence: None,
            },
            60,
        )
        .unwrap();
        record_vote(&db, "v1", VoteType::VoteIn).unwrap();
        record_vote(&db, "v1", VoteType::VoteIn).unwrap();
        record_vote(&db, "v1", VoteType::VoteOut).unwrap();
        promotions::create_ad(
            &db,
            "b1",
            &NewAd {
                title: "Fresh snacks".into(),
                ..Default::default()
            },
        )
        .unwrap();
        promotions::create_discount(
            &db,
            "b1",
            &NewDiscount {
                machine_id: None,
                machine_item_id: None,
                code: "TENOFF".into(),
                kind: DiscountKind::Percent,
                amount: 10.0,
                max_uses: None,
                starts_at: None,
                expires_at: None,
            },
        )
        .unwrap();

        let board = dashboard(&db, &MemoryStore::default(), "b1", 60).unwrap();
        assert_eq!(board.machine_count, 1);
        assert_eq!(board.item_count, 2);
        assert_eq!(board.total_stock, 20);
        assert_eq!(board.inventory_value, 35.0);
        assert_eq!(board.mappings.total, 1);
        assert_eq!(board.mappings.synced, 1);
        assert_eq!(board.votes_in, 2);
        assert_eq!(board.votes_out, 1);
        assert_eq!(board.top_items.len(), 1);
        assert_eq!(board.top_items[0].net, 1);
        assert_eq!(board.active_promotions, 2);
        assert_eq!(board.system_kind, SystemKind::Manual);
    }

    #[test]
    fn mapping_counts_by_status() {
        let counts = count_mappings([
            SyncStatus::Synced,
            SyncStatus::Partial,
            SyncStatus::Synced,
            SyncStatus::Unsynced,
        ]);
        assert_eq!(counts.total, 4);
        assert_eq!(counts.synced, 2);
        assert_eq!(counts.partial, 1);
        assert_eq!(counts.unsynced, 1);
    }
}
