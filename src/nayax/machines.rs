//! Mirror of the business's Nayax machine list.

use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::db::{self, DbState};
use crate::error::AppResult;
use crate::nayax::api::{NayaxClient, NayaxMachine};
use crate::nayax::credentials::require_credentials;
use crate::storage::SecretStore;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroredMachine {
    pub nayax_machine_id: String,
    pub name: String,
    pub serial_number: Option<String>,
    pub status: Option<String>,
    pub updated_at: String,
    /// Local machine linked to this Nayax machine, if any.
    pub linked_machine_id: Option<String>,
    pub cache_fetched_at: Option<String>,
}

/// Replace the mirrored machine list with the live one.
pub async fn sync_machines(
    db: &DbState,
    secrets: &dyn SecretStore,
    client: &NayaxClient,
    business_id: &str,
) -> AppResult<Vec<MirroredMachine>> {
    let auth = require_credentials(db, secrets, business_id)?;
    let machines = client.list_machines(&auth.base_url, &auth.token).await?;
    store_machines(db, business_id, &machines)?;
    info!(business_id = %business_id, count = machines.len(), "nayax machines synced");
    list_machines(db, business_id)
}

pub(crate) fn store_machines(
    db: &DbState,
    business_id: &str,
    machines: &[NayaxMachine],
) -> AppResult<()> {
    let now = Utc::now().to_rfc3339();
    let conn = db.conn.lock()?;
    db::with_transaction(&conn, |tx| -> AppResult<()> {
        tx.execute(
            "DELETE FROM nayax_machines WHERE business_id = ?1",
            params![business_id],
        )?;
        for machine in machines {
            let raw = json!(machine).to_string();
            tx.execute(
                "INSERT INTO nayax_machines
                    (business_id, nayax_machine_id, name, serial_number, status, raw, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(business_id, nayax_machine_id) DO UPDATE SET
                    name = excluded.name,
                    serial_number = excluded.serial_number,
                    status = excluded.status,
                    raw = excluded.raw,
                    updated_at = excluded.updated_at",
                params![
                    business_id,
                    machine.machine_id,
                    machine.name,
                    machine.serial_number,
                    machine.status,
                    raw,
                    now
                ],
            )?;
        }
        Ok(())
    })
}

pub fn list_machines(db: &DbState, business_id: &str) -> AppResult<Vec<MirroredMachine>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT nm.nayax_machine_id, nm.name, nm.serial_number, nm.status, nm.updated_at,
                (SELECT m.id FROM machines m
                  WHERE m.business_id = nm.business_id AND m.nayax_machine_id = nm.nayax_machine_id
                  LIMIT 1),
                c.fetched_at
         FROM nayax_machines nm
         LEFT JOIN nayax_inventory_cache c
           ON c.business_id = nm.business_id AND c.nayax_machine_id = nm.nayax_machine_id
         WHERE nm.business_id = ?1
         ORDER BY nm.name COLLATE NOCASE",
    )?;
    let rows = stmt.query_map(params![business_id], |row| {
        Ok(MirroredMachine {
            nayax_machine_id: row.get(0)?,
            name: row.get(1)?,
            serial_number: row.get(2)?,
            status: row.get(3)?,
            updated_at: row.get(4)?,
            linked_machine_id: row.get(5)?,
            cache_fetched_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{fixtures, test_db};
    use crate::nayax::api::mock;
    use crate::nayax::credentials::save_credentials;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn sync_replaces_mirror_and_reports_links() {
        let db = test_db();
        let secrets = MemoryStore::default();
        {
            let conn = db.conn.lock().unwrap();
            fixtures::business(&conn, "b1");
            fixtures::machine(&conn, "b1", "m1", Some("NX-2"));
            conn.execute(
                "INSERT INTO nayax_machines (business_id, nayax_machine_id, name, updated_at)
                 VALUES ('b1', 'NX-OLD', 'Retired', datetime('now'))",
                [],
            )
            .unwrap();
        }
        let base = mock::spawn(mock::MockData {
            machines: serde_json::json!([
                { "MachineID": "NX-1", "MachineName": "Gym" },
                { "MachineID": 2, "MachineName": "Office" },
                { "MachineID": "NX-2", "MachineName": "Lobby", "SerialNumber": "SN9" }
            ]),
            ..Default::default()
        })
        .await;
        save_credentials(&db, &secrets, "b1", &base, mock::TOKEN).unwrap();
        let client = NayaxClient::new(Duration::from_secs(10)).unwrap();

        let machines = sync_machines(&db, &secrets, &client, "b1").await.unwrap();
        let names: Vec<&str> = machines.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Gym", "Lobby", "Office"]);
        let lobby = machines.iter().find(|m| m.name == "Lobby").unwrap();
        assert_eq!(lobby.linked_machine_id.as_deref(), Some("m1"));
        assert_eq!(lobby.serial_number.as_deref(), Some("SN9"));
        assert!(machines.iter().all(|m| m.nayax_machine_id != "NX-OLD"));
    }

    #[tokio::test]
    async fn sync_without_credentials_fails_cleanly() {
        let db = test_db();
        let secrets = MemoryStore::default();
        fixtures::business(&db.conn.lock().unwrap(), "b1");
        let client = NayaxClient::new(Duration::from_secs(10)).unwrap();
        let err = sync_machines(&db, &secrets, &client, "b1")
            .await
            .expect_err("not configured");
        assert!(err.to_string().contains("not configured"));
    }
}
