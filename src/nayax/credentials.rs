//! Per-business Nayax credentials.
//!
//! The database row keeps the base URL and a reference into the secret
//! store; the bearer token itself lives only in the [`SecretStore`].

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::DbState;
use crate::error::{AppError, AppResult};
use crate::nayax::api::{normalize_base_url, ConnectivityResult, NayaxClient};
use crate::storage::{mask, nayax_token_key, Secret, SecretStore};

/// Resolved credentials for one business.
pub struct NayaxAuth {
    pub base_url: String,
    pub token: Secret,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub configured: bool,
    pub base_url: Option<String>,
    pub token_present: bool,
    pub token_hint: Option<String>,
    pub last_verified_at: Option<String>,
    pub last_error: Option<String>,
}

pub fn save_credentials(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
    base_url: &str,
    token: &str,
) -> AppResult<CredentialStatus> {
    let base_url = normalize_base_url(base_url);
    if base_url.is_empty() {
        return Err(AppError::BadRequest("Missing Nayax base URL".into()));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Missing Nayax API token".into()));
    }

    let token_ref = nayax_token_key(business_id);
    secrets
        .set(&token_ref, token)
        .map_err(|e| AppError::Internal(format!("store nayax token: {e}")))?;

    let now = Utc::now().to_rfc3339();
    {
        let conn = db.conn.lock()?;
        conn.execute(
            "INSERT INTO nayax_credentials (business_id, base_url, token_ref, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(business_id) DO UPDATE SET
                base_url = excluded.base_url,
                token_ref = excluded.token_ref,
                last_verified_at = NULL,
                last_error = NULL,
                updated_at = excluded.updated_at",
            params![business_id, base_url, token_ref, now],
        )?;
    }

    info!(business_id = %business_id, token = %mask(token), "nayax credentials saved");
    credential_status(db, secrets, business_id)
}

pub fn credential_status(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
) -> AppResult<CredentialStatus> {
    let row: Option<(String, String, Option<String>, Option<String>)> = {
        let conn = db.conn.lock()?;
        conn.query_row(
            "SELECT base_url, token_ref, last_verified_at, last_error
             FROM nayax_credentials WHERE business_id = ?1",
            params![business_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?
    };

    Ok(match row {
        Some((base_url, token_ref, last_verified_at, last_error)) => {
            let token = secrets.get(&token_ref);
            CredentialStatus {
                configured: token.is_some(),
                base_url: Some(base_url),
                token_present: token.is_some(),
                token_hint: token.as_deref().map(|t| mask(t)),
                last_verified_at,
                last_error,
            }
        }
        None => CredentialStatus {
            configured: false,
            base_url: None,
            token_present: false,
            token_hint: None,
            last_verified_at: None,
            last_error: None,
        },
    })
}

/// Load credentials, or `None` when the business has not configured Nayax.
pub fn load_credentials(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
) -> AppResult<Option<NayaxAuth>> {
    let row: Option<(String, String)> = {
        let conn = db.conn.lock()?;
        conn.query_row(
            "SELECT base_url, token_ref FROM nayax_credentials WHERE business_id = ?1",
            params![business_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
    };
    let Some((base_url, token_ref)) = row else {
        return Ok(None);
    };
    match secrets.get(&token_ref) {
        Some(token) => Ok(Some(NayaxAuth { base_url, token })),
        None => {
            warn!(business_id = %business_id, "nayax credential row has no stored token");
            Ok(None)
        }
    }
}

pub fn require_credentials(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
) -> AppResult<NayaxAuth> {
    load_credentials(db, secrets, business_id)?
        .ok_or_else(|| AppError::BadRequest("Nayax is not configured for this business".into()))
}

pub fn delete_credentials(
    db: &DbState,
    secrets: &dyn SecretStore,
    business_id: &str,
) -> AppResult<bool> {
    secrets
        .delete(&nayax_token_key(business_id))
        .map_err(|e| AppError::Internal(format!("delete nayax token: {e}")))?;
    let removed = {
        let conn = db.conn.lock()?;
        conn.execute(
            "DELETE FROM nayax_credentials WHERE business_id = ?1",
            params![business_id],
        )?
    };
    info!(business_id = %business_id, removed, "nayax credentials deleted");
    Ok(removed > 0)
}

/// Check the stored credentials against the live API and record the outcome.
pub async fn test_credentials(
    db: &DbState,
    secrets: &dyn SecretStore,
    client: &NayaxClient,
    business_id: &str,
) -> AppResult<ConnectivityResult> {
    let auth = require_credentials(db, secrets, business_id)?;
    let result = client.check_connection(&auth.base_url, &auth.token).await;

    let now = Utc::now().to_rfc3339();
    let conn = db.conn.lock()?;
    if result.success {
        conn.execute(
            "UPDATE nayax_credentials SET last_verified_at = ?1, last_error = NULL, updated_at = ?1
             WHERE business_id = ?2",
            params![now, business_id],
        )?;
    } else {
        conn.execute(
            "UPDATE nayax_credentials SET last_error = ?1, updated_at = ?2 WHERE business_id = ?3",
            params![result.error, now, business_id],
        )?;
    }
    Ok(result)
}
