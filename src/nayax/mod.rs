//! Nayax point-of-sale integration: API client, credentials, machine
//! mirror and per-machine inventory cache.

pub mod api;
pub mod credentials;
pub mod inventory;
pub mod machines;

pub use api::{NayaxClient, NayaxProduct};
