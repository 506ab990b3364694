//! Sync status of a mapping, derived from the age of its machine's cache.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Partial,
    Unsynced,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Partial => "partial",
            SyncStatus::Unsynced => "unsynced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "partial" => Ok(SyncStatus::Partial),
            "unsynced" => Ok(SyncStatus::Unsynced),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Parse an RFC 3339 timestamp, or SQLite's `datetime('now')` format as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// No cache is `Unsynced`; a cache older than `fresh_minutes` (or with an
/// unreadable timestamp) is `Partial`; otherwise `Synced`.
pub fn derive_sync_status(
    cache_fetched_at: Option<&str>,
    now: DateTime<Utc>,
    fresh_minutes: i64,
) -> SyncStatus {
    let Some(fetched_at) = cache_fetched_at else {
        return SyncStatus::Unsynced;
    };
    match parse_timestamp(fetched_at) {
        Some(fetched) if now - fetched <= Duration::minutes(fresh_minutes) => SyncStatus::Synced,
        _ => SyncStatus::Partial,
    }
}
