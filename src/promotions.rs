//! Promotional ads and discount codes.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::catalog::require_machine;
use crate::db::{self, DbState};
use crate::error::{AppError, AppResult};
use crate::mapping::status::parse_timestamp;

const MAX_CODE_LEN: usize = 32;
const MIN_CODE_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse an optional window boundary and store it normalised to RFC 3339.
fn window_bound(label: &str, value: Option<&str>) -> AppResult<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(|dt| Some(dt.to_rfc3339()))
            .ok_or_else(|| AppError::BadRequest(format!("{label} is not a valid timestamp"))),
    }
}

fn check_window(starts_at: Option<&str>, ends_at: Option<&str>) -> AppResult<()> {
    if let (Some(start), Some(end)) = (
        starts_at.and_then(parse_timestamp),
        ends_at.and_then(parse_timestamp),
    ) {
        if end <= start {
            return Err(AppError::BadRequest("End must be after start".into()));
        }
    }
    Ok(())
}

/// Whether `now` falls inside an optional [start, end) window.
fn within_window(starts_at: Option<&str>, ends_at: Option<&str>, now: DateTime<Utc>) -> bool {
    let started = starts_at
        .and_then(parse_timestamp)
        .map_or(true, |start| start <= now);
    let not_ended = ends_at.and_then(parse_timestamp).map_or(true, |end| now < end);
    started && not_ended
}

// ---------------------------------------------------------------------------
// Ads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionalAd {
    pub id: String,
    /// `None` for ads shown on every machine of the business.
    pub machine_id: Option<String>,
    pub title: String,
    pub body: String,
    pub is_active: bool,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    /// Flag set and inside the schedule window right now.
    pub currently_active: bool,
    pub created_at: String,
}

#[derive(Debug, Default)]
pub struct NewAd {
    pub machine_id: Option<String>,
    pub title: String,
    pub body: Option<String>,
    pub is_active: Option<bool>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
}

const AD_SELECT: &str = "SELECT id, machine_id, title, body, is_active, starts_at, ends_at, created_at
     FROM promotional_ads";

fn row_to_ad(row: &rusqlite::Row<'_>, now: DateTime<Utc>) -> rusqlite::Result<PromotionalAd> {
    let is_active: bool = row.get(4)?;
    let starts_at: Option<String> = row.get(5)?;
    let ends_at: Option<String> = row.get(6)?;
    Ok(PromotionalAd {
        id: row.get(0)?,
        machine_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        currently_active: is_active
            && within_window(starts_at.as_deref(), ends_at.as_deref(), now),
        is_active,
        starts_at,
        ends_at,
        created_at: row.get(7)?,
    })
}

fn load_ad(conn: &Connection, business_id: &str, ad_id: &str) -> AppResult<PromotionalAd> {
    let now = Utc::now();
    conn.query_row(
        &format!("{AD_SELECT} WHERE id = ?1 AND business_id = ?2"),
        params![ad_id, business_id],
        |row| row_to_ad(row, now),
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Ad not found".into()))
}

pub fn create_ad(db: &DbState, business_id: &str, new: &NewAd) -> AppResult<PromotionalAd> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(AppError::BadRequest("Ad title is required".into()));
    }
    let starts_at = window_bound("Start", new.starts_at.as_deref())?;
    let ends_at = window_bound("End", new.ends_at.as_deref())?;
    check_window(starts_at.as_deref(), ends_at.as_deref())?;

    let conn = db.conn.lock()?;
    let machine_id = new
        .machine_id
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    if let Some(machine_id) = machine_id {
        require_machine(&conn, business_id, machine_id)?;
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO promotional_ads
            (id, business_id, machine_id, title, body, is_active, starts_at, ends_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            business_id,
            machine_id,
            title,
            new.body.as_deref().unwrap_or("").trim(),
            new.is_active.unwrap_or(true),
            starts_at,
            ends_at,
            now
        ],
    )?;
    info!(business_id = %business_id, ad_id = %id, "promotional ad created");
    load_ad(&conn, business_id, &id)
}

pub fn list_ads(db: &DbState, business_id: &str, active_only: bool) -> AppResult<Vec<PromotionalAd>> {
    let now = Utc::now();
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "{AD_SELECT} WHERE business_id = ?1 ORDER BY created_at DESC"
    ))?;
    let ads = stmt
        .query_map(params![business_id], |row| row_to_ad(row, now))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ads
        .into_iter()
        .filter(|ad| !active_only || ad.currently_active)
        .collect())
}

/// Ads currently showing on one machine, for the customer screen.
pub fn ads_for_machine(db: &DbState, machine_id: &str) -> AppResult<Vec<PromotionalAd>> {
    let now = Utc::now();
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "{AD_SELECT}
         WHERE business_id = (SELECT business_id FROM machines WHERE id = ?1)
           AND (machine_id IS NULL OR machine_id = ?1)
           AND is_active = 1
         ORDER BY created_at DESC"
    ))?;
    let ads = stmt
        .query_map(params![machine_id], |row| row_to_ad(row, now))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ads.into_iter().filter(|ad| ad.currently_active).collect())
}

pub fn set_ad_active(
    db: &DbState,
    business_id: &str,
    ad_id: &str,
    active: bool,
) -> AppResult<PromotionalAd> {
    let conn = db.conn.lock()?;
    let changed = conn.execute(
        "UPDATE promotional_ads SET is_active = ?1, updated_at = ?2
         WHERE id = ?3 AND business_id = ?4",
        params![active, Utc::now().to_rfc3339(), ad_id, business_id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound("Ad not found".into()));
    }
    load_ad(&conn, business_id, ad_id)
}

pub fn delete_ad(db: &DbState, business_id: &str, ad_id: &str) -> AppResult<()> {
    let conn = db.conn.lock()?;
    let removed = conn.execute(
        "DELETE FROM promotional_ads WHERE id = ?1 AND business_id = ?2",
        params![ad_id, business_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound("Ad not found".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Discounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Percent,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscountKind::Percent => "percent",
            DiscountKind::Fixed => "fixed",
        }
    }

    /// Price after the discount, never below zero, rounded to cents.
    pub fn apply(self, amount: f64, price: f64) -> f64 {
        let discounted = match self {
            DiscountKind::Percent => price * (1.0 - amount.min(100.0) / 100.0),
            DiscountKind::Fixed => price - amount,
        };
        (discounted.max(0.0) * 100.0).round() / 100.0
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent" => Ok(DiscountKind::Percent),
            "fixed" => Ok(DiscountKind::Fixed),
            other => Err(format!("unknown discount kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub id: String,
    pub machine_id: Option<String>,
    pub machine_item_id: Option<String>,
    pub code: String,
    pub kind: DiscountKind,
    pub amount: f64,
    pub max_uses: Option<i64>,
    pub uses: i64,
    pub starts_at: Option<String>,
    pub expires_at: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug)]
pub struct NewDiscount {
    pub machine_id: Option<String>,
    pub machine_item_id: Option<String>,
    pub code: String,
    pub kind: DiscountKind,
    pub amount: f64,
    pub max_uses: Option<i64>,
    pub starts_at: Option<String>,
    pub expires_at: Option<String>,
}

/// What the customer pays with a code applied.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountQuote {
    pub discount_id: String,
    pub code: String,
    pub kind: DiscountKind,
    pub amount: f64,
    pub original_price: Option<f64>,
    pub discounted_price: Option<f64>,
    pub remaining_uses: Option<i64>,
}

/// Codes are case-insensitive and stored upper-case.
pub fn normalize_code(code: &str) -> AppResult<String> {
    let code = code.trim().to_uppercase();
    let valid = (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(AppError::BadRequest(format!(
            "Discount codes are {MIN_CODE_LEN}-{MAX_CODE_LEN} letters, digits, '-' or '_'"
        )));
    }
    Ok(code)
}

const DISCOUNT_SELECT: &str = "SELECT id, machine_id, machine_item_id, code, kind, amount, max_uses,
        uses, starts_at, expires_at, is_active, created_at
     FROM discounts";

fn row_to_discount(row: &rusqlite::Row<'_>) -> rusqlite::Result<Discount> {
    let kind: String = row.get(4)?;
    Ok(Discount {
        id: row.get(0)?,
        machine_id: row.get(1)?,
        machine_item_id: row.get(2)?,
        code: row.get(3)?,
        // CHECK constraint limits kind to the two variants
        kind: kind.parse().unwrap_or(DiscountKind::Fixed),
        amount: row.get(5)?,
        max_uses: row.get(6)?,
        uses: row.get(7)?,
        starts_at: row.get(8)?,
        expires_at: row.get(9)?,
        is_active: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub fn create_discount(db: &DbState, business_id: &str, new: &NewDiscount) -> AppResult<Discount> {
    let code = normalize_code(&new.code)?;
    if !new.amount.is_finite() || new.amount <= 0.0 {
        return Err(AppError::BadRequest("Discount amount must be positive".into()));
    }
    if new.kind == DiscountKind::Percent && new.amount > 100.0 {
        return Err(AppError::BadRequest("A percentage discount cannot exceed 100".into()));
    }
    if new.max_uses.is_some_and(|m| m <= 0) {
        return Err(AppError::BadRequest("Maximum uses must be positive".into()));
    }
    let starts_at = window_bound("Start", new.starts_at.as_deref())?;
    let expires_at = window_bound("Expiry", new.expires_at.as_deref())?;
    check_window(starts_at.as_deref(), expires_at.as_deref())?;

    let conn = db.conn.lock()?;
    if let Some(machine_id) = new.machine_id.as_deref() {
        require_machine(&conn, business_id, machine_id)?;
    }
    if let Some(item_id) = new.machine_item_id.as_deref() {
        let item_machine: String = conn
            .query_row(
                "SELECT machine_id FROM machine_items WHERE id = ?1 AND business_id = ?2",
                params![item_id, business_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound("Machine item not found".into()))?;
        if new.machine_id.as_deref().is_some_and(|m| m != item_machine) {
            return Err(AppError::BadRequest("Item is not on the selected machine".into()));
        }
    }
    let taken = conn
        .query_row(
            "SELECT 1 FROM discounts WHERE business_id = ?1 AND code = ?2",
            params![business_id, code],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(AppError::Conflict(format!("Discount code {code} already exists")));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO discounts
            (id, business_id, machine_id, machine_item_id, code, kind, amount, max_uses,
             starts_at, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            business_id,
            new.machine_id,
            new.machine_item_id,
            code,
            new.kind.as_str(),
            new.amount,
            new.max_uses,
            starts_at,
            expires_at,
            Utc::now().to_rfc3339()
        ],
    )?;
    info!(business_id = %business_id, discount_id = %id, code = %code, "discount created");

    conn.query_row(
        &format!("{DISCOUNT_SELECT} WHERE id = ?1"),
        params![id],
        row_to_discount,
    )
    .map_err(AppError::from)
}

pub fn list_discounts(db: &DbState, business_id: &str) -> AppResult<Vec<Discount>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(&format!(
        "{DISCOUNT_SELECT} WHERE business_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map(params![business_id], row_to_discount)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_discount(db: &DbState, business_id: &str, discount_id: &str) -> AppResult<()> {
    let conn = db.conn.lock()?;
    let removed = conn.execute(
        "DELETE FROM discounts WHERE id = ?1 AND business_id = ?2",
        params![discount_id, business_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound("Discount not found".into()));
    }
    Ok(())
}

/// Why a code cannot be used right now.
pub fn rejection_reason(
    discount: &Discount,
    machine_id: &str,
    machine_item_id: Option<&str>,
    now: DateTime<Utc>,
) -> Option<&'static str> {
    if !discount.is_active {
        return Some("This discount code is no longer active");
    }
    if let Some(start) = discount.starts_at.as_deref().and_then(parse_timestamp) {
        if now < start {
            return Some("This discount code is not valid yet");
        }
    }
    if let Some(expiry) = discount.expires_at.as_deref().and_then(parse_timestamp) {
        if now >= expiry {
            return Some("This discount code has expired");
        }
    }
    if discount.max_uses.is_some_and(|max| discount.uses >= max) {
        return Some("This discount code has been used up");
    }
    if discount.machine_id.as_deref().is_some_and(|m| m != machine_id) {
        return Some("This discount code is not valid on this machine");
    }
    if let Some(item) = discount.machine_item_id.as_deref() {
        if machine_item_id != Some(item) {
            return Some("This discount code is not valid for this item");
        }
    }
    None
}

/// Look up and check a code for one machine, quoting the discounted price.
fn quote_conn(
    conn: &Connection,
    machine_id: &str,
    code: &str,
    machine_item_id: Option<&str>,
    price: Option<f64>,
    now: DateTime<Utc>,
) -> AppResult<DiscountQuote> {
    let code = normalize_code(code)?;
    let discount = conn
        .query_row(
            &format!(
                "{DISCOUNT_SELECT}
                 WHERE code = ?1 AND business_id = (SELECT business_id FROM machines WHERE id = ?2)"
            ),
            params![code, machine_id],
            row_to_discount,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("Unknown discount code".into()))?;

    if let Some(reason) = rejection_reason(&discount, machine_id, machine_item_id, now) {
        return Err(AppError::BadRequest(reason.into()));
    }
    if price.is_some_and(|p| !p.is_finite() || p < 0.0) {
        return Err(AppError::BadRequest("Price must be zero or more".into()));
    }

    let original_price = match (price, machine_item_id) {
        (Some(p), _) => Some(p),
        (None, Some(item)) => conn
            .query_row(
                "SELECT price FROM machine_items WHERE id = ?1 AND machine_id = ?2",
                params![item, machine_id],
                |row| row.get(0),
            )
            .optional()?,
        (None, None) => None,
    };

    Ok(DiscountQuote {
        discounted_price: original_price.map(|p| discount.kind.apply(discount.amount, p)),
        original_price,
        remaining_uses: discount.max_uses.map(|max| (max - discount.uses).max(0)),
        discount_id: discount.id,
        code: discount.code,
        kind: discount.kind,
        amount: discount.amount,
    })
}

pub fn validate_discount(
    db: &DbState,
    machine_id: &str,
    code: &str,
    machine_item_id: Option<&str>,
    price: Option<f64>,
) -> AppResult<DiscountQuote> {
    let conn = db.conn.lock()?;
    quote_conn(&conn, machine_id, code, machine_item_id, price, Utc::now())
}

/// Validate and consume one use of a code. The use counter only moves while
/// it is below `max_uses`, so concurrent redemptions cannot overshoot.
pub fn redeem_discount(
    db: &DbState,
    machine_id: &str,
    code: &str,
    machine_item_id: Option<&str>,
    price: Option<f64>,
) -> AppResult<DiscountQuote> {
    let conn = db.conn.lock()?;
    let quote = db::with_transaction(&conn, |tx| -> AppResult<DiscountQuote> {
        let mut quote = quote_conn(tx, machine_id, code, machine_item_id, price, Utc::now())?;
        let updated = tx.execute(
            "UPDATE discounts SET uses = uses + 1
             WHERE id = ?1 AND (max_uses IS NULL OR uses < max_uses)",
            params![quote.discount_id],
        )?;
        if updated == 0 {
            return Err(AppError::BadRequest("This discount code has been used up".into()));
        }
        quote.remaining_uses = quote.remaining_uses.map(|r| (r - 1).max(0));
        Ok(quote)
    })?;
    info!(machine_id = %machine_id, discount_id = %quote.discount_id, "discount redeemed");
    Ok(quote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, test_db};
    use chrono::Duration;

    fn setup() -> DbState {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::business(&conn, "b1");
            fixtures::business(&conn, "b2");
            fixtures::machine(&conn, "b1", "m1", None);
            fixtures::machine(&conn, "b1", "m2", None);
            fixtures::machine(&conn, "b2", "m9", None);
            fixtures::machine_item(&conn, "b1", "m1", "i1", "Cola", 2.0);
        }
        db
    }

    fn discount(code: &str) -> NewDiscount {
        NewDiscount {
            machine_id: None,
            machine_item_id: None,
            code: code.into(),
            kind: DiscountKind::Percent,
            amount: 25.0,
            max_uses: None,
            starts_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn ad_activity_follows_flag_and_window() {
        let db = setup();
        let past = (Utc::now() - Duration::days(2)).to_rfc3339();
        let yesterday = (Utc::now() - Duration::days(1)).to_rfc3339();
        let tomorrow = (Utc::now() + Duration::days(1)).to_rfc3339();

        let running = create_ad(
            &db,
            "b1",
            &NewAd {
                title: "Summer sale".into(),
                starts_at: Some(yesterday.clone()),
                ends_at: Some(tomorrow),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(running.currently_active);
        create_ad(
            &db,
            "b1",
            &NewAd {
                title: "Over".into(),
                starts_at: Some(past),
                ends_at: Some(yesterday),
                ..Default::default()
            },
        )
        .unwrap();
        create_ad(
            &db,
            "b1",
            &NewAd {
                title: "Paused".into(),
                is_active: Some(false),
                machine_id: Some("m1".into()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(list_ads(&db, "b1", false).unwrap().len(), 3);
        let active = list_ads(&db, "b1", true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Summer sale");

        let paused = set_ad_active(&db, "b1", &running.id, false).unwrap();
        assert!(!paused.currently_active);
        assert!(ads_for_machine(&db, "m1").unwrap().is_empty());
        assert!(set_ad_active(&db, "b2", &running.id, true).is_err());
        delete_ad(&db, "b1", &running.id).unwrap();
        assert!(delete_ad(&db, "b1", &running.id).is_err());
    }

    #[test]
    fn ad_validation() {
        let db = setup();
        assert!(create_ad(&db, "b1", &NewAd::default()).is_err());
        let backwards = NewAd {
            title: "x".into(),
            starts_at: Some("2030-01-02T00:00:00Z".into()),
            ends_at: Some("2030-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        assert!(create_ad(&db, "b1", &backwards).is_err());
        let foreign = NewAd {
            title: "x".into(),
            machine_id: Some("m9".into()),
            ..Default::default()
        };
        assert!(matches!(create_ad(&db, "b1", &foreign), Err(AppError::NotFound(_))));
    }

    #[test]
    fn codes_are_unique_and_normalised() {
        let db = setup();
        let created = create_discount(&db, "b1", &discount(" save25 ")).unwrap();
        assert_eq!(created.code, "SAVE25");
        assert!(matches!(
            create_discount(&db, "b1", &discount("SAVE25")),
            Err(AppError::Conflict(_))
        ));
        // another business may reuse the code
        create_discount(&db, "b2", &discount("SAVE25")).unwrap();
        assert!(create_discount(&db, "b1", &discount("no spaces")).is_err());

        let mut too_much = discount("BIG");
        too_much.amount = 120.0;
        assert!(create_discount(&db, "b1", &too_much).is_err());
    }

    #[test]
    fn validate_quotes_discounted_price() {
        let db = setup();
        create_discount(&db, "b1", &discount("SAVE25")).unwrap();
        let quote = validate_discount(&db, "m1", "save25", Some("i1"), None).unwrap();
        assert_eq!(quote.original_price, Some(2.0));
        assert_eq!(quote.discounted_price, Some(1.5));

        let mut fixed = discount("TAKE3");
        fixed.kind = DiscountKind::Fixed;
        fixed.amount = 3.0;
        create_discount(&db, "b1", &fixed).unwrap();
        let quote = validate_discount(&db, "m1", "TAKE3", None, Some(2.0)).unwrap();
        assert_eq!(quote.discounted_price, Some(0.0));

        assert!(matches!(
            validate_discount(&db, "m9", "SAVE25", None, None),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn validate_rejects_unusable_codes() {
        let db = setup();
        let mut expired = discount("OLD");
        expired.starts_at = Some((Utc::now() - Duration::days(3)).to_rfc3339());
        expired.expires_at = Some((Utc::now() - Duration::days(1)).to_rfc3339());
        create_discount(&db, "b1", &expired).unwrap();
        let err = validate_discount(&db, "m1", "OLD", None, None).expect_err("expired");
        assert!(err.to_string().contains("expired"));

        let mut scoped = discount("M1ONLY");
        scoped.machine_id = Some("m1".into());
        create_discount(&db, "b1", &scoped).unwrap();
        assert!(validate_discount(&db, "m1", "M1ONLY", None, None).is_ok());
        let err = validate_discount(&db, "m2", "M1ONLY", None, None).expect_err("wrong machine");
        assert!(err.to_string().contains("machine"));

        let mut item_only = discount("COLA");
        item_only.machine_item_id = Some("i1".into());
        create_discount(&db, "b1", &item_only).unwrap();
        assert!(validate_discount(&db, "m1", "COLA", None, Some(2.0)).is_err());
        assert!(validate_discount(&db, "m1", "COLA", Some("i1"), None).is_ok());

        let inactive = create_discount(&db, "b1", &discount("OFF")).unwrap();
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE discounts SET is_active = 0 WHERE id = ?1",
                params![inactive.id],
            )
            .unwrap();
        assert!(validate_discount(&db, "m1", "OFF", None, None).is_err());
    }

    #[test]
    fn redeem_stops_at_max_uses() {
        let db = setup();
        let mut limited = discount("TWICE");
        limited.max_uses = Some(2);
        create_discount(&db, "b1", &limited).unwrap();

        let first = redeem_discount(&db, "m1", "TWICE", None, Some(4.0)).unwrap();
        assert_eq!(first.remaining_uses, Some(1));
        assert_eq!(first.discounted_price, Some(3.0));
        let second = redeem_discount(&db, "m1", "TWICE", None, None).unwrap();
        assert_eq!(second.remaining_uses, Some(0));

        let err = redeem_discount(&db, "m1", "TWICE", None, None).expect_err("exhausted");
        assert!(err.to_string().contains("used up"));
        let uses: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT uses FROM discounts WHERE code = 'TWICE'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(uses, 2);
    }

    #[test]
    fn discount_math() {
        assert_eq!(DiscountKind::Percent.apply(10.0, 1.99), 1.79);
        assert_eq!(DiscountKind::Percent.apply(100.0, 5.0), 0.0);
        assert_eq!(DiscountKind::Fixed.apply(0.5, 1.25), 0.75);
    }
}
