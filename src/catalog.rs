//! Master catalog, machines and per-machine items.
//!
//! Master items are templates shared by every business. Machines and their
//! items belong to one business; looking one up from another business is a
//! `NotFound`, never a `Forbidden`, so ids do not leak across tenants.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{AppError, AppResult};

const DEFAULT_CATEGORY: &str = "Uncategorized";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub suggested_price: Option<f64>,
    pub suggested_cost: Option<f64>,
}

#[derive(Debug, Default)]
pub struct NewMasterItem {
    pub name: String,
    pub category: Option<String>,
    pub suggested_price: Option<f64>,
    pub suggested_cost: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub item_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub nayax_machine_id: Option<String>,
    pub item_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Default)]
pub struct NewMachine {
    pub name: String,
    pub location: Option<String>,
    pub nayax_machine_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineItem {
    pub id: String,
    pub machine_id: String,
    pub master_item_id: Option<String>,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub cost: f64,
    pub stock: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Either a master item reference or custom fields; explicit fields
/// override the master item's.
#[derive(Debug, Default)]
pub struct NewMachineItem {
    pub master_item_id: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub cost: Option<f64>,
    pub stock: i64,
}

#[derive(Debug, Default)]
pub struct MachineItemUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub cost: Option<f64>,
    pub stock: Option<i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn check_amount(label: &str, value: Option<f64>) -> AppResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(AppError::BadRequest(format!(
            "{label} must be zero or more"
        ))),
        _ => Ok(()),
    }
}

fn row_to_machine_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<MachineItem> {
    Ok(MachineItem {
        id: row.get(0)?,
        machine_id: row.get(1)?,
        master_item_id: row.get(2)?,
        name: row.get(3)?,
        category: row.get(4)?,
        price: row.get(5)?,
        cost: row.get(6)?,
        stock: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const ITEM_COLUMNS: &str =
    "id, machine_id, master_item_id, name, category, price, cost, stock, created_at, updated_at";

/// Name of the machine, or `NotFound` when it is not the business's.
pub(crate) fn require_machine(
    conn: &Connection,
    business_id: &str,
    machine_id: &str,
) -> AppResult<String> {
    conn.query_row(
        "SELECT name FROM machines WHERE id = ?1 AND business_id = ?2",
        params![machine_id, business_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Machine not found".into()))
}

fn load_machine_item(
    conn: &Connection,
    business_id: &str,
    item_id: &str,
) -> AppResult<MachineItem> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM machine_items WHERE id = ?1 AND business_id = ?2"),
        params![item_id, business_id],
        row_to_machine_item,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Machine item not found".into()))
}

fn load_machine(conn: &Connection, business_id: &str, machine_id: &str) -> AppResult<Machine> {
    conn.query_row(
        "SELECT m.id, m.name, m.location, m.nayax_machine_id,
                (SELECT COUNT(*) FROM machine_items mi WHERE mi.machine_id = m.id),
                m.created_at, m.updated_at
         FROM machines m WHERE m.id = ?1 AND m.business_id = ?2",
        params![machine_id, business_id],
        row_to_machine,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Machine not found".into()))
}

fn row_to_machine(row: &rusqlite::Row<'_>) -> rusqlite::Result<Machine> {
    Ok(Machine {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        nayax_machine_id: row.get(3)?,
        item_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

// ---------------------------------------------------------------------------
// Master catalog
// ---------------------------------------------------------------------------

/// Active master items, optionally filtered by category (case-insensitive).
pub fn list_master_items(db: &DbState, category: Option<&str>) -> AppResult<Vec<MasterItem>> {
    let category = clean(category);
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT id, name, category, suggested_price, suggested_cost FROM master_items
         WHERE is_active = 1 AND (?1 IS NULL OR category = ?1 COLLATE NOCASE)
         ORDER BY category COLLATE NOCASE, name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map(params![category], |row| {
            Ok(MasterItem {
                id: row.get(0)?,
                name: row.get(1)?,
                category: row.get(2)?,
                suggested_price: row.get(3)?,
                suggested_cost: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_master_item(db: &DbState, new: &NewMasterItem) -> AppResult<MasterItem> {
    let name = clean(Some(new.name.as_str()))
        .ok_or_else(|| AppError::BadRequest("Item name is required".into()))?;
    check_amount("Suggested price", new.suggested_price)?;
    check_amount("Suggested cost", new.suggested_cost)?;
    let category =
        clean(new.category.as_deref()).unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let item = MasterItem {
        id: Uuid::new_v4().to_string(),
        name,
        category,
        suggested_price: new.suggested_price,
        suggested_cost: new.suggested_cost,
    };
    let conn = db.conn.lock()?;
    conn.execute(
        "INSERT INTO master_items (id, name, category, suggested_price, suggested_cost, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.id,
            item.name,
            item.category,
            item.suggested_price,
            item.suggested_cost,
            Utc::now().to_rfc3339()
        ],
    )?;
    info!(master_item_id = %item.id, "master item created");
    Ok(item)
}

pub fn list_categories(db: &DbState) -> AppResult<Vec<CategoryCount>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT category, COUNT(*) FROM master_items WHERE is_active = 1
         GROUP BY category ORDER BY category COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CategoryCount {
                category: row.get(0)?,
                item_count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Machines
// ---------------------------------------------------------------------------

pub fn create_machine(db: &DbState, business_id: &str, new: &NewMachine) -> AppResult<Machine> {
    let name = clean(Some(new.name.as_str()))
        .ok_or_else(|| AppError::BadRequest("Machine name is required".into()))?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    let conn = db.conn.lock()?;
    conn.execute(
        "INSERT INTO machines (id, business_id, name, location, nayax_machine_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            id,
            business_id,
            name,
            clean(new.location.as_deref()),
            clean(new.nayax_machine_id.as_deref()),
            now
        ],
    )?;
    info!(business_id = %business_id, machine_id = %id, "machine created");
    load_machine(&conn, business_id, &id)
}

pub fn list_machines(db: &DbState, business_id: &str) -> AppResult<Vec<Machine>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.name, m.location, m.nayax_machine_id,
                (SELECT COUNT(*) FROM machine_items mi WHERE mi.machine_id = m.id),
                m.created_at, m.updated_at
         FROM machines m WHERE m.business_id = ?1
         ORDER BY m.name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map(params![business_id], row_to_machine)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Set or clear the Nayax machine behind a local machine.
pub fn link_machine_to_nayax(
    db: &DbState,
    business_id: &str,
    machine_id: &str,
    nayax_machine_id: Option<&str>,
) -> AppResult<Machine> {
    let nayax_machine_id = clean(nayax_machine_id);
    let conn = db.conn.lock()?;
    require_machine(&conn, business_id, machine_id)?;
    conn.execute(
        "UPDATE machines SET nayax_machine_id = ?1, updated_at = ?2
         WHERE id = ?3 AND business_id = ?4",
        params![nayax_machine_id, Utc::now().to_rfc3339(), machine_id, business_id],
    )?;
    info!(
        business_id = %business_id,
        machine_id = %machine_id,
        nayax_machine_id = nayax_machine_id.as_deref().unwrap_or("-"),
        "machine nayax link updated"
    );
    load_machine(&conn, business_id, machine_id)
}

// ---------------------------------------------------------------------------
// Machine items
// ---------------------------------------------------------------------------

/// Add an item to a machine and to the machine's voting list, creating the
/// list on first use. All three writes commit together or not at all.
pub fn add_item_to_machine(
    db: &DbState,
    business_id: &str,
    machine_id: &str,
    new: &NewMachineItem,
) -> AppResult<MachineItem> {
    check_amount("Price", new.price)?;
    check_amount("Cost", new.cost)?;
    if new.stock < 0 {
        return Err(AppError::BadRequest("Stock must be zero or more".into()));
    }

    let conn = db.conn.lock()?;
    let machine_name = require_machine(&conn, business_id, machine_id)?;

    let master: Option<MasterItem> = match clean(new.master_item_id.as_deref()) {
        Some(master_id) => {
            let found = conn
                .query_row(
                    "SELECT id, name, category, suggested_price, suggested_cost
                     FROM master_items WHERE id = ?1 AND is_active = 1",
                    params![master_id],
                    |row| {
                        Ok(MasterItem {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            category: row.get(2)?,
                            suggested_price: row.get(3)?,
                            suggested_cost: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Some(found.ok_or_else(|| AppError::NotFound("Master item not found".into()))?)
        }
        None => None,
    };

    let name = clean(new.name.as_deref())
        .or_else(|| master.as_ref().map(|m| m.name.clone()))
        .ok_or_else(|| AppError::BadRequest("Item name is required".into()))?;
    let category = clean(new.category.as_deref())
        .or_else(|| master.as_ref().map(|m| m.category.clone()))
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    let price = new
        .price
        .or_else(|| master.as_ref().and_then(|m| m.suggested_price))
        .unwrap_or(0.0);
    let cost = new
        .cost
        .or_else(|| master.as_ref().and_then(|m| m.suggested_cost))
        .unwrap_or(0.0);

    let item_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    db::with_transaction(&conn, |tx| -> AppResult<()> {
        tx.execute(
            "INSERT INTO machine_items
                (id, business_id, machine_id, master_item_id, name, category, price, cost, stock,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                item_id,
                business_id,
                machine_id,
                master.as_ref().map(|m| m.id.as_str()),
                name,
                category,
                price,
                cost,
                new.stock,
                now
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO voting_lists (id, business_id, machine_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                business_id,
                machine_id,
                format!("{machine_name} voting"),
                now
            ],
        )?;
        let list_id: String = tx.query_row(
            "SELECT id FROM voting_lists WHERE machine_id = ?1",
            params![machine_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO voting_list_items (id, voting_list_id, machine_item_id, name, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![Uuid::new_v4().to_string(), list_id, item_id, name, category, now],
        )?;
        Ok(())
    })?;

    info!(
        business_id = %business_id,
        machine_id = %machine_id,
        machine_item_id = %item_id,
        "item added to machine"
    );
    load_machine_item(&conn, business_id, &item_id)
}

pub fn list_machine_items(
    db: &DbState,
    business_id: &str,
    machine_id: &str,
) -> AppResult<Vec<MachineItem>> {
    let conn = db.conn.lock()?;
    require_machine(&conn, business_id, machine_id)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM machine_items
         WHERE machine_id = ?1 AND business_id = ?2
         ORDER BY name COLLATE NOCASE"
    ))?;
    let rows = stmt
        .query_map(params![machine_id, business_id], row_to_machine_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Patch an item; the voting list entry follows name and category changes.
pub fn update_machine_item(
    db: &DbState,
    business_id: &str,
    item_id: &str,
    update: &MachineItemUpdate,
) -> AppResult<MachineItem> {
    check_amount("Price", update.price)?;
    check_amount("Cost", update.cost)?;
    if update.stock.is_some_and(|s| s < 0) {
        return Err(AppError::BadRequest("Stock must be zero or more".into()));
    }
    if update.name.is_some() && clean(update.name.as_deref()).is_none() {
        return Err(AppError::BadRequest("Item name cannot be empty".into()));
    }

    let conn = db.conn.lock()?;
    let current = load_machine_item(&conn, business_id, item_id)?;
    let name = clean(update.name.as_deref()).unwrap_or(current.name);
    let category = clean(update.category.as_deref()).unwrap_or(current.category);
    let price = update.price.unwrap_or(current.price);
    let cost = update.cost.unwrap_or(current.cost);
    let stock = update.stock.unwrap_or(current.stock);
    let now = Utc::now().to_rfc3339();

    db::with_transaction(&conn, |tx| -> AppResult<()> {
        tx.execute(
            "UPDATE machine_items
             SET name = ?1, category = ?2, price = ?3, cost = ?4, stock = ?5, updated_at = ?6
             WHERE id = ?7 AND business_id = ?8",
            params![name, category, price, cost, stock, now, item_id, business_id],
        )?;
        tx.execute(
            "UPDATE voting_list_items SET name = ?1, category = ?2 WHERE machine_item_id = ?3",
            params![name, category, item_id],
        )?;
        Ok(())
    })?;
    load_machine_item(&conn, business_id, item_id)
}

/// Delete an item. Its voting entry, votes and mappings cascade with it.
pub fn remove_machine_item(db: &DbState, business_id: &str, item_id: &str) -> AppResult<()> {
    let conn = db.conn.lock()?;
    let removed = conn.execute(
        "DELETE FROM machine_items WHERE id = ?1 AND business_id = ?2",
        params![item_id, business_id],
    )?;
    if removed == 0 {
        return Err(AppError::NotFound("Machine item not found".into()));
    }
    info!(business_id = %business_id, machine_item_id = %item_id, "machine item removed");
    Ok(())
}
