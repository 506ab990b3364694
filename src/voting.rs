//! Customer voting lists and vote analytics.
//!
//! Every machine gets one voting list, created when its first item is added.
//! Customers vote items "in" (keep or add) or "out" (replace) without an
//! account; operators read the aggregated results.

use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::require_machine;
use crate::db::DbState;
use crate::error::{AppError, AppResult};

const MAX_ANALYTICS_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    VoteIn,
    VoteOut,
}

impl VoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteType::VoteIn => "vote_in",
            VoteType::VoteOut => "vote_out",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingItem {
    pub id: String,
    pub machine_item_id: Option<String>,
    pub name: String,
    pub category: String,
    pub vote_in: i64,
    pub vote_out: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingList {
    /// `None` until the machine's first item creates the list.
    pub id: Option<String>,
    pub machine_id: String,
    pub machine_name: String,
    pub name: Option<String>,
    pub items: Vec<VotingItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTotals {
    pub voting_list_item_id: String,
    pub vote_in: i64,
    pub vote_out: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemVotes {
    pub voting_list_item_id: String,
    pub machine_item_id: Option<String>,
    pub machine_id: String,
    pub machine_name: String,
    pub name: String,
    pub category: String,
    pub vote_in: i64,
    pub vote_out: i64,
    pub net: i64,
    pub approval_pct: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyVotes {
    pub date: String,
    pub vote_in: i64,
    pub vote_out: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteAnalytics {
    pub days: i64,
    pub since: String,
    pub total_in: i64,
    pub total_out: i64,
    pub items: Vec<ItemVotes>,
    pub daily: Vec<DailyVotes>,
}

/// Share of "in" votes, one decimal; zero when nobody voted.
pub fn approval_pct(vote_in: i64, vote_out: i64) -> f64 {
    let total = vote_in + vote_out;
    if total <= 0 {
        return 0.0;
    }
    (vote_in as f64 * 1000.0 / total as f64).round() / 10.0
}

fn load_list(conn: &Connection, machine_id: &str, machine_name: String) -> AppResult<VotingList> {
    let list: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM voting_lists WHERE machine_id = ?1",
            params![machine_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((list_id, list_name)) = list else {
        return Ok(VotingList {
            id: None,
            machine_id: machine_id.to_string(),
            machine_name,
            name: None,
            items: vec![],
        });
    };

    let mut stmt = conn.prepare(
        "SELECT vli.id, vli.machine_item_id, vli.name, vli.category,
                COALESCE(SUM(v.vote_type = 'vote_in'), 0),
                COALESCE(SUM(v.vote_type = 'vote_out'), 0)
         FROM voting_list_items vli
         LEFT JOIN votes v ON v.voting_list_item_id = vli.id
         WHERE vli.voting_list_id = ?1
         GROUP BY vli.id
         ORDER BY vli.name COLLATE NOCASE",
    )?;
    let items = stmt
        .query_map(params![list_id], |row| {
            Ok(VotingItem {
                id: row.get(0)?,
                machine_item_id: row.get(1)?,
                name: row.get(2)?,
                category: row.get(3)?,
                vote_in: row.get(4)?,
                vote_out: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VotingList {
        id: Some(list_id),
        machine_id: machine_id.to_string(),
        machine_name,
        name: Some(list_name),
        items,
    })
}

/// The machine's voting list with current totals, for the operator.
pub fn get_voting_list(db: &DbState, business_id: &str, machine_id: &str) -> AppResult<VotingList> {
    let conn = db.conn.lock()?;
    let machine_name = require_machine(&conn, business_id, machine_id)?;
    load_list(&conn, machine_id, machine_name)
}

/// The same list for the customer-facing voting page.
pub fn public_voting_list(db: &DbState, machine_id: &str) -> AppResult<VotingList> {
    let conn = db.conn.lock()?;
    let machine_name: String = conn
        .query_row(
            "SELECT name FROM machines WHERE id = ?1",
            params![machine_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Machine not found".into()))?;
    load_list(&conn, machine_id, machine_name)
}

/// Record one anonymous vote and return the item's new totals.
pub fn record_vote(
    db: &DbState,
    voting_list_item_id: &str,
    vote_type: VoteType,
) -> AppResult<VoteTotals> {
    let conn = db.conn.lock()?;
    let exists = conn
        .query_row(
            "SELECT 1 FROM voting_list_items WHERE id = ?1",
            params![voting_list_item_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(AppError::NotFound("Voting item not found".into()));
    }

    conn.execute(
        "INSERT INTO votes (voting_list_item_id, vote_type, created_at) VALUES (?1, ?2, ?3)",
        params![voting_list_item_id, vote_type.as_str(), Utc::now().to_rfc3339()],
    )?;
    debug!(voting_list_item_id = %voting_list_item_id, vote = vote_type.as_str(), "vote recorded");

    let (vote_in, vote_out) = conn.query_row(
        "SELECT COALESCE(SUM(vote_type = 'vote_in'), 0), COALESCE(SUM(vote_type = 'vote_out'), 0)
         FROM votes WHERE voting_list_item_id = ?1",
        params![voting_list_item_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(VoteTotals {
        voting_list_item_id: voting_list_item_id.to_string(),
        vote_in,
        vote_out,
    })
}

/// Per-item and per-day vote totals over the last `days` days.
pub fn vote_analytics(
    db: &DbState,
    business_id: &str,
    days: i64,
    machine_id: Option<&str>,
) -> AppResult<VoteAnalytics> {
    let days = days.clamp(1, MAX_ANALYTICS_DAYS);
    let since = (Utc::now() - Duration::days(days)).to_rfc3339();

    let conn = db.conn.lock()?;
    if let Some(machine_id) = machine_id {
        require_machine(&conn, business_id, machine_id)?;
    }

    let mut stmt = conn.prepare(
        "SELECT vli.id, vli.machine_item_id, m.id, m.name, vli.name, vli.category,
                COALESCE(SUM(v.vote_type = 'vote_in'), 0),
                COALESCE(SUM(v.vote_type = 'vote_out'), 0)
         FROM voting_list_items vli
         JOIN voting_lists vl ON vl.id = vli.voting_list_id
         JOIN machines m ON m.id = vl.machine_id
         LEFT JOIN votes v ON v.voting_list_item_id = vli.id AND v.created_at >= ?2
         WHERE vl.business_id = ?1 AND (?3 IS NULL OR m.id = ?3)
         GROUP BY vli.id",
    )?;
    let mut items = stmt
        .query_map(params![business_id, since, machine_id], |row| {
            let vote_in: i64 = row.get(6)?;
            let vote_out: i64 = row.get(7)?;
            Ok(ItemVotes {
                voting_list_item_id: row.get(0)?,
                machine_item_id: row.get(1)?,
                machine_id: row.get(2)?,
                machine_name: row.get(3)?,
                name: row.get(4)?,
                category: row.get(5)?,
                vote_in,
                vote_out,
                net: vote_in - vote_out,
                approval_pct: approval_pct(vote_in, vote_out),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    items.sort_by(|a, b| {
        b.net
            .cmp(&a.net)
            .then_with(|| b.vote_in.cmp(&a.vote_in))
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    let mut stmt = conn.prepare(
        "SELECT substr(v.created_at, 1, 10) AS day,
                SUM(v.vote_type = 'vote_in'), SUM(v.vote_type = 'vote_out')
         FROM votes v
         JOIN voting_list_items vli ON vli.id = v.voting_list_item_id
         JOIN voting_lists vl ON vl.id = vli.voting_list_id
         WHERE vl.business_id = ?1 AND v.created_at >= ?2 AND (?3 IS NULL OR vl.machine_id = ?3)
         GROUP BY day ORDER BY day",
    )?;
    let daily = stmt
        .query_map(params![business_id, since, machine_id], |row| {
            Ok(DailyVotes {
                date: row.get(0)?,
                vote_in: row.get(1)?,
                vote_out: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(VoteAnalytics {
        days,
        since,
        total_in: items.iter().map(|i| i.vote_in).sum(),
        total_out: items.iter().map(|i| i.vote_out).sum(),
        items,
        daily,
    })
}
