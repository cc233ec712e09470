mod assign;
mod error;
mod lease;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use assign::{AllocatorConfig, Assignment};
pub use error::EngineError;
pub use lease::{Lease, LeaseConfig, LeaseManager};
pub use queries::CityDemand;

use std::sync::Arc;

use crate::model::{CabRecord, CityRecord, UnixSecs, attr, cab_key, city_key, counter_key};
use crate::store::{Attr, Item, Store};

/// Counter categories used by the id generator.
pub const CATEGORY_CAB: &str = "cab";
pub const CATEGORY_CITY: &str = "city";

pub(crate) fn now_secs() -> UnixSecs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as UnixSecs
}

/// Fleet-dispatch engine: every operation talks to the store and nothing
/// else; all cross-process coordination happens through the store's
/// conditional writes.
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    leases: LeaseManager,
    pub(crate) allocator: AllocatorConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, lease: LeaseConfig, allocator: AllocatorConfig) -> Self {
        Self {
            leases: LeaseManager::new(store.clone(), lease),
            store,
            allocator,
        }
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Seed the sequence counters if this is a fresh table. `increment`
    /// already treats a missing counter as zero, so this only makes the
    /// records visible up front.
    pub async fn bootstrap(&self) -> Result<(), EngineError> {
        for category in [CATEGORY_CAB, CATEGORY_CITY] {
            let key = counter_key(category);
            if self.store.get(&key).await?.is_none() {
                let item = Item::from([(attr::VALUE.to_string(), Attr::n(0))]);
                self.store.put(&key, item).await?;
            }
        }
        Ok(())
    }

    /// Category-scoped sequence id, e.g. `cab_12`. The counter advances
    /// server-side; never computed from a read.
    pub async fn next_id(&self, category: &str) -> Result<String, EngineError> {
        let n = self
            .store
            .increment(&counter_key(category), attr::VALUE, 1)
            .await?;
        Ok(format!("{category}_{n}"))
    }

    pub(crate) async fn load_cab(&self, id: &str) -> Result<CabRecord, EngineError> {
        let item = self
            .store
            .get(&cab_key(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("cab {id}")))?;
        Ok(CabRecord::from_item(&item)?)
    }

    pub(crate) async fn load_city(&self, id: &str) -> Result<CityRecord, EngineError> {
        let item = self
            .store
            .get(&city_key(id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("city {id}")))?;
        Ok(CityRecord::from_item(&item)?)
    }
}
