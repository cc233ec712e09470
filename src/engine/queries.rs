use crate::model::{CityRecord, PART_LOCATIONS, sort_history};
use crate::store::Store;

use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityDemand {
    pub city_id: String,
    pub city_name: String,
    pub demand: i64,
}

impl Engine {
    /// Cities ranked by booking demand, highest first; ties stay in id order.
    pub async fn demand_ranking(&self) -> Result<Vec<CityDemand>, EngineError> {
        let items = self.store.query(PART_LOCATIONS, &[]).await?;
        let mut cities = items
            .iter()
            .map(CityRecord::from_item)
            .collect::<Result<Vec<_>, _>>()?;
        cities.sort_by(|a, b| b.demand.cmp(&a.demand).then_with(|| a.id.cmp(&b.id)));
        Ok(cities
            .into_iter()
            .map(|c| CityDemand {
                city_id: c.id,
                city_name: c.name,
                demand: c.demand,
            })
            .collect())
    }

    /// A cab's history, ordered by the sequence number each entry embeds.
    pub async fn cab_history(&self, cab_id: &str) -> Result<Vec<String>, EngineError> {
        let cab = self.load_cab(cab_id).await?;
        let mut entries = cab.history;
        sort_history(&mut entries);
        Ok(entries)
    }
}
