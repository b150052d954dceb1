//! Pluggable storage layer (C5/C6/C7): cache, blacklist/whitelist and log
//! engines each expose a driver trait with in-memory, file and SQL
//! implementations that are swapped at runtime by the manager (C9).

pub mod cache;
pub mod error;
pub mod list;
pub mod log;

pub use cache::CacheStore;
pub use error::StoreError;
pub use list::ListStore;
pub use log::LogStore;

use std::sync::Arc;

/// The set of storage drivers backing a running resolver. Held behind an
/// `arc-swap`-free `Arc` so the manager can publish a new bundle wholesale
/// on `updateDrivers` without resolver tasks observing a half-swapped
/// state.
#[derive(Clone)]
pub struct Drivers {
    pub cache: Arc<dyn CacheStore>,
    pub blacklist: Arc<dyn ListStore>,
    pub whitelist: Arc<dyn ListStore>,
    pub logs: Arc<dyn LogStore>,
}

impl Drivers {
    /// In-memory everything; used for tests and as the zero-config default.
    pub fn in_memory() -> Self {
        Self {
            cache: Arc::new(cache::MemoryCacheStore::default()),
            blacklist: Arc::new(list::MemoryListStore::default()),
            whitelist: Arc::new(list::MemoryListStore::default()),
            logs: Arc::new(log::MemoryLogStore::default()),
        }
    }
}
