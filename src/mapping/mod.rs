//! Product mapping between the manual catalog and Nayax selections.

pub mod detector;
pub mod engine;
pub mod similarity;
pub mod status;
pub mod store;
pub mod suggest;

pub use detector::{SystemKind, SystemProfile};
pub use engine::UnifiedSyncEngine;
pub use status::SyncStatus;
pub use store::{MappingType, NewMapping};
