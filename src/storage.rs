//! Secret storage for Nayax API tokens.
//!
//! Tokens never touch the database. The `nayax_credentials` row only keeps a
//! `token_ref` naming the entry in a [`SecretStore`]. The production backend
//! is the OS credential store (via the `keyring` crate); the in-memory
//! backend is used by tests and single-process deployments without a
//! Secret Service.

use keyring::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;
use zeroize::{Zeroize, Zeroizing};

use crate::config::SecretBackend;

const SERVICE_NAME: &str = "vendsync";

/// A secret value that is wiped from memory when dropped.
pub type Secret = Zeroizing<String>;

pub trait SecretStore: Send + Sync {
    /// Returns `None` when the entry does not exist.
    fn get(&self, key: &str) -> Option<Secret>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    /// Succeeds when the entry does not exist.
    fn delete(&self, key: &str) -> Result<(), String>;
}

pub fn open_store(backend: SecretBackend) -> Arc<dyn SecretStore> {
    match backend {
        SecretBackend::Keyring => Arc::new(KeyringStore),
        SecretBackend::Memory => Arc::new(MemoryStore::default()),
    }
}

/// Key under which a business's Nayax token is stored.
pub fn nayax_token_key(business_id: &str) -> String {
    format!("nayax_token:{business_id}")
}

// ---------------------------------------------------------------------------
// OS credential store
// ---------------------------------------------------------------------------

pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Option<Secret> {
        let entry = match Entry::new(SERVICE_NAME, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(Zeroizing::new(pw)),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
        entry.set_password(value).map_err(|e| e.to_string())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Process-local store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Secret> {
        let entries = self.entries.lock().ok()?;
        entries.get(key).map(|v| Zeroizing::new(v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        if let Some(mut previous) = entries.insert(key.to_string(), value.to_string()) {
            previous.zeroize();
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        if let Some(mut previous) = entries.remove(key) {
            previous.zeroize();
        }
        Ok(())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Ok(entries) = self.entries.get_mut() {
            for value in entries.values_mut() {
                value.zeroize();
            }
        }
    }
}

/// Mask a secret or identifier for logs, keeping the last four characters.
pub fn mask(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    let suffix: String = trimmed
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{suffix}")
}
