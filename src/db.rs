//! SQLite database layer for vendsync.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations and the shared
//! connection state used by every request handler.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Highest version in `MIGRATIONS`.
pub const CURRENT_SCHEMA_VERSION: i32 = 5;

/// Initialize the database at `{data_dir}/vendsync.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations.
pub fn init(data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = data_dir.join("vendsync.db");
    info!("Opening database at {}", db_path.display());

    let conn = open_and_configure(&db_path)?;
    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// One schema step. `sql` runs as a single batch and must be re-runnable.
struct Migration {
    version: i32,
    label: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        label: "accounts",
        sql: ACCOUNTS_SQL,
    },
    Migration {
        version: 2,
        label: "catalog + voting",
        sql: CATALOG_SQL,
    },
    Migration {
        version: 3,
        label: "nayax",
        sql: NAYAX_SQL,
    },
    Migration {
        version: 4,
        label: "product mappings",
        sql: MAPPINGS_SQL,
    },
    Migration {
        version: 5,
        label: "promotions",
        sql: PROMOTIONS_SQL,
    },
];

/// Bring the schema up to `CURRENT_SCHEMA_VERSION`, one step per pending migration.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current = schema_version(conn);
    if current >= CURRENT_SCHEMA_VERSION {
        info!(version = current, "schema current");
        return Ok(());
    }
    if current > 0 {
        warn!(from = current, to = CURRENT_SCHEMA_VERSION, "upgrading schema");
    }

    for step in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply(conn, step)?;
    }
    Ok(())
}

fn apply(conn: &Connection, step: &Migration) -> Result<(), String> {
    with_transaction(conn, |tx| {
        tx.execute_batch(step.sql)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [step.version],
        )?;
        Ok::<_, rusqlite::Error>(())
    })
    .map_err(|e| {
        error!(version = step.version, "schema step failed: {e}");
        format!("schema v{} ({}): {e}", step.version, step.label)
    })?;

    info!(version = step.version, "applied schema step: {}", step.label);
    Ok(())
}

/// v1: businesses, users and sessions.
const ACCOUNTS_SQL: &str = "
        CREATE TABLE IF NOT EXISTS businesses (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            failed_attempts INTEGER NOT NULL DEFAULT 0,
            last_failed_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            business_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_users_business ON users(business_id);
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
";

/// v2: catalog, machines and voting.
const CATALOG_SQL: &str = "
        -- master_items (catalog templates shared across businesses)
        CREATE TABLE IF NOT EXISTS master_items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'Uncategorized',
            suggested_price REAL,
            suggested_cost REAL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS machines (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            name TEXT NOT NULL,
            location TEXT,
            nayax_machine_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS machine_items (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            machine_id TEXT NOT NULL,
            master_item_id TEXT,
            name TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'Uncategorized',
            price REAL NOT NULL DEFAULT 0 CHECK (price >= 0),
            cost REAL NOT NULL DEFAULT 0 CHECK (cost >= 0),
            stock INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_id) REFERENCES machines(id) ON DELETE CASCADE,
            FOREIGN KEY(master_item_id) REFERENCES master_items(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS voting_lists (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            machine_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_id) REFERENCES machines(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS voting_list_items (
            id TEXT PRIMARY KEY,
            voting_list_id TEXT NOT NULL,
            machine_item_id TEXT,
            name TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'Uncategorized',
            created_at TEXT NOT NULL,
            FOREIGN KEY(voting_list_id) REFERENCES voting_lists(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_item_id) REFERENCES machine_items(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            voting_list_item_id TEXT NOT NULL,
            vote_type TEXT NOT NULL CHECK (vote_type IN ('vote_in', 'vote_out')),
            created_at TEXT NOT NULL,
            FOREIGN KEY(voting_list_item_id) REFERENCES voting_list_items(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_master_items_category ON master_items(category);
        CREATE INDEX IF NOT EXISTS idx_machines_business ON machines(business_id);
        CREATE INDEX IF NOT EXISTS idx_machine_items_machine ON machine_items(machine_id);
        CREATE INDEX IF NOT EXISTS idx_machine_items_business ON machine_items(business_id);
        CREATE INDEX IF NOT EXISTS idx_votes_item_created ON votes(voting_list_item_id, created_at);
";

/// v3: Nayax credentials, machine mirror and inventory cache.
const NAYAX_SQL: &str = "
        -- token_ref points into the secret store; no token material is stored here
        CREATE TABLE IF NOT EXISTS nayax_credentials (
            business_id TEXT PRIMARY KEY,
            base_url TEXT NOT NULL,
            token_ref TEXT NOT NULL,
            last_verified_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS nayax_machines (
            business_id TEXT NOT NULL,
            nayax_machine_id TEXT NOT NULL,
            name TEXT NOT NULL,
            serial_number TEXT,
            status TEXT,
            raw TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL,
            PRIMARY KEY (business_id, nayax_machine_id),
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS nayax_inventory_cache (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            business_id TEXT NOT NULL,
            nayax_machine_id TEXT NOT NULL,
            products TEXT NOT NULL DEFAULT '[]',
            product_count INTEGER NOT NULL DEFAULT 0,
            version TEXT,
            fetched_at TEXT NOT NULL,
            UNIQUE(business_id, nayax_machine_id),
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE
        );
";

/// v4: product mappings between machine items and Nayax selections.
const MAPPINGS_SQL: &str = "
        CREATE TABLE IF NOT EXISTS product_mappings (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            machine_item_id TEXT NOT NULL,
            nayax_machine_id TEXT NOT NULL,
            selection_code TEXT NOT NULL,
            mapping_type TEXT NOT NULL CHECK (mapping_type IN ('direct', 'smart')),
            confidence INTEGER NOT NULL DEFAULT 100 CHECK (confidence BETWEEN 0 AND 100),
            sync_status TEXT NOT NULL DEFAULT 'unsynced'
                CHECK (sync_status IN ('synced', 'partial', 'unsynced')),
            last_synced_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(machine_item_id, mapping_type),
            UNIQUE(business_id, nayax_machine_id, selection_code, mapping_type),
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_item_id) REFERENCES machine_items(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_mappings_business ON product_mappings(business_id);
        CREATE INDEX IF NOT EXISTS idx_mappings_nayax_machine
            ON product_mappings(business_id, nayax_machine_id);
";

/// v5: promotional ads and discount codes.
const PROMOTIONS_SQL: &str = "
        CREATE TABLE IF NOT EXISTS promotional_ads (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            machine_id TEXT,
            title TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            starts_at TEXT,
            ends_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_id) REFERENCES machines(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS discounts (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            machine_id TEXT,
            machine_item_id TEXT,
            code TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('percent', 'fixed')),
            amount REAL NOT NULL CHECK (amount > 0),
            max_uses INTEGER,
            uses INTEGER NOT NULL DEFAULT 0,
            starts_at TEXT,
            expires_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            UNIQUE(business_id, code),
            FOREIGN KEY(business_id) REFERENCES businesses(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_id) REFERENCES machines(id) ON DELETE CASCADE,
            FOREIGN KEY(machine_item_id) REFERENCES machine_items(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_ads_business ON promotional_ads(business_id);
        CREATE INDEX IF NOT EXISTS idx_discounts_business ON discounts(business_id);
";

/// Read the applied schema version.
pub fn schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back when it fails.
pub fn with_transaction<T, E>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<rusqlite::Error>,
{
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(value) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                warn!("rollback failed: {rollback_err}");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("enable foreign keys");
    run_migrations(conn).expect("test migrations");
}

#[cfg(test)]
pub fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

/// Seed helpers shared by module tests.
#[cfg(test)]
pub mod fixtures {
    use chrono::Utc;
    use rusqlite::{params, Connection};

    pub fn business(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO businesses (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, format!("Business {id}"), Utc::now().to_rfc3339()],
        )
        .expect("insert business");
    }

    pub fn machine(conn: &Connection, business_id: &str, id: &str, nayax_id: Option<&str>) {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO machines (id, business_id, name, nayax_machine_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, business_id, format!("Machine {id}"), nayax_id, now],
        )
        .expect("insert machine");
    }

    pub fn machine_item(
        conn: &Connection,
        business_id: &str,
        machine_id: &str,
        id: &str,
        name: &str,
        price: f64,
    ) {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO machine_items (id, business_id, machine_id, name, category, price, cost, stock, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'Snacks', ?5, 0, 10, ?6, ?6)",
            params![id, business_id, machine_id, name, price, now],
        )
        .expect("insert machine item");
    }

    pub fn inventory_cache(
        conn: &Connection,
        business_id: &str,
        nayax_machine_id: &str,
        products: serde_json::Value,
        fetched_at: &str,
    ) {
        let count = products.as_array().map(|a| a.len()).unwrap_or(0) as i64;
        conn.execute(
            "INSERT INTO nayax_inventory_cache (business_id, nayax_machine_id, products, product_count, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(business_id, nayax_machine_id) DO UPDATE SET
                products = excluded.products,
                product_count = excluded.product_count,
                fetched_at = excluded.fetched_at",
            params![business_id, nayax_machine_id, products.to_string(), count, fetched_at],
        )
        .expect("insert inventory cache");
    }
}
