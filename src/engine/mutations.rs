use tracing::info;

use crate::model::{CabRecord, CabState, CityRecord, attr};
use crate::store::{Attr, Item, Store, StoreError};

use super::{CATEGORY_CAB, CATEGORY_CITY, Engine, EngineError, now_secs};

impl Engine {
    pub async fn onboard_city(&self, name: &str) -> Result<String, EngineError> {
        let id = self.next_id(CATEGORY_CITY).await?;
        let city = CityRecord {
            id: id.clone(),
            name: name.to_string(),
            demand: 0,
        };
        self.store.put(&city.key(), city.to_item()).await?;
        info!(city = %id, name, "city onboarded");
        Ok(id)
    }

    pub async fn register_cab(
        &self,
        name: &str,
        category: &str,
        city_id: &str,
    ) -> Result<String, EngineError> {
        let id = self.next_id(CATEGORY_CAB).await?;
        let now = now_secs();
        let cab = CabRecord {
            id: id.clone(),
            name: name.to_string(),
            category: category.to_string(),
            location: city_id.to_string(),
            destination: String::new(),
            state: CabState::Idle,
            last_activity: now,
            lease: 0,
            history: vec![format!("0. State: {} | Registered At: {now}", CabState::Idle)],
        };
        self.store.put(&cab.key(), cab.to_item()).await?;
        info!(cab = %id, city = city_id, category, "cab registered");
        Ok(id)
    }

    /// `ON_TRIP → IDLE`. Destination comes from the request when given,
    /// otherwise from the record; the idle clock resets to now.
    pub async fn end_trip(&self, cab_id: &str, city_id: Option<&str>) -> Result<(), EngineError> {
        let cab = self.load_cab(cab_id).await?;
        let destination = match city_id {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => cab.destination.clone(),
        };
        let now = now_secs();

        let mut history = cab.history.clone();
        history.push(cab.next_history_entry(&format!(
            "State: {} | Trip Ended In: {destination} | EndTime: {now}",
            CabState::Idle
        )));

        let attrs = Item::from([
            (attr::STATE.to_string(), Attr::s(CabState::Idle.as_str())),
            (attr::LOCATION.to_string(), Attr::s(&destination)),
            (attr::DESTINATION.to_string(), Attr::s("")),
            (attr::LAST_ACTIVITY.to_string(), Attr::n(now)),
            (attr::HISTORY.to_string(), Attr::ss(history)),
        ]);
        self.guarded_transition(&cab, attrs, CabState::OnTrip).await?;
        info!(cab = %cab_id, city = %destination, "trip ended");
        Ok(())
    }

    /// `IDLE → IN_ACTIVE`.
    pub async fn deactivate_cab(&self, cab_id: &str) -> Result<(), EngineError> {
        let cab = self.load_cab(cab_id).await?;
        let now = now_secs();

        let mut history = cab.history.clone();
        history.push(
            cab.next_history_entry(&format!("State: {} | Time: {now}", CabState::Inactive)),
        );

        let attrs = Item::from([
            (attr::STATE.to_string(), Attr::s(CabState::Inactive.as_str())),
            (attr::HISTORY.to_string(), Attr::ss(history)),
        ]);
        self.guarded_transition(&cab, attrs, CabState::Idle).await?;
        info!(cab = %cab_id, "cab deactivated");
        Ok(())
    }

    /// `IN_ACTIVE → IDLE`; the idle clock resets to now.
    pub async fn activate_cab(&self, cab_id: &str) -> Result<(), EngineError> {
        let cab = self.load_cab(cab_id).await?;
        let now = now_secs();

        let mut history = cab.history.clone();
        history.push(cab.next_history_entry(&format!("State: {} | Time: {now}", CabState::Idle)));

        let attrs = Item::from([
            (attr::STATE.to_string(), Attr::s(CabState::Idle.as_str())),
            (attr::LAST_ACTIVITY.to_string(), Attr::n(now)),
            (attr::HISTORY.to_string(), Attr::ss(history)),
        ]);
        self.guarded_transition(&cab, attrs, CabState::Inactive).await?;
        info!(cab = %cab_id, "cab activated");
        Ok(())
    }

    /// Move a cab between cities; only allowed while `IN_ACTIVE`.
    pub async fn relocate_cab(&self, cab_id: &str, city_id: &str) -> Result<(), EngineError> {
        let cab = self.load_cab(cab_id).await?;

        let mut history = cab.history.clone();
        history.push(cab.next_history_entry(&format!(
            "City Changed From: {} to {city_id}",
            cab.location
        )));

        let attrs = Item::from([
            (attr::LOCATION.to_string(), Attr::s(city_id)),
            (attr::HISTORY.to_string(), Attr::ss(history)),
        ]);
        self.guarded_transition(&cab, attrs, CabState::Inactive).await?;
        info!(cab = %cab_id, city = city_id, "cab relocated");
        Ok(())
    }

    /// One guarded write per transition: the precondition on the current
    /// state is what keeps a stale read from winning.
    pub(crate) async fn guarded_transition(
        &self,
        cab: &CabRecord,
        attrs: Item,
        require: CabState,
    ) -> Result<(), EngineError> {
        let expected = Item::from([(attr::STATE.to_string(), Attr::s(require.as_str()))]);
        match self.store.update_guarded(&cab.key(), attrs, expected).await {
            Ok(()) => Ok(()),
            Err(StoreError::PreconditionFailed) => Err(EngineError::Conflict(format!(
                "cab {} is no longer {require}",
                cab.id
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
