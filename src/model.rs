use crate::store::{Attr, Item, Key, StoreError};

/// Unix seconds — the only time type.
pub type UnixSecs = i64;

/// Partition prefixes of the single logical table.
pub const PART_RESOURCES: &str = "resources/";
pub const PART_LOCATIONS: &str = "locations/";
pub const PART_COUNTERS: &str = "counters/";

/// Attribute names shared by every record type.
pub mod attr {
    pub const ID: &str = "Id";
    pub const NAME: &str = "Name";
    pub const CATEGORY: &str = "Category";
    pub const LOCATION: &str = "Location";
    pub const DESTINATION: &str = "Destination";
    pub const STATE: &str = "State";
    pub const LAST_ACTIVITY: &str = "LastActivityTime";
    pub const LEASE: &str = "Lease";
    pub const HISTORY: &str = "History";
    pub const DEMAND: &str = "Demand";
    pub const VALUE: &str = "Value";
}

/// Cab lifecycle state as persisted in the `State` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CabState {
    Idle,
    OnTrip,
    Inactive,
}

impl CabState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CabState::Idle => "IDLE",
            CabState::OnTrip => "ON_TRIP",
            CabState::Inactive => "IN_ACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(CabState::Idle),
            "ON_TRIP" => Some(CabState::OnTrip),
            "IN_ACTIVE" => Some(CabState::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for CabState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Attribute access helpers ─────────────────────────────

pub(crate) fn get_s(item: &Item, name: &'static str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(|a| a.as_s())
        .map(str::to_string)
        .ok_or(StoreError::Malformed(name))
}

pub(crate) fn get_n(item: &Item, name: &'static str) -> Result<i64, StoreError> {
    item.get(name)
        .and_then(|a| a.as_n())
        .ok_or(StoreError::Malformed(name))
}

pub(crate) fn get_ss(item: &Item, name: &'static str) -> Result<Vec<String>, StoreError> {
    item.get(name)
        .and_then(|a| a.as_ss())
        .map(<[String]>::to_vec)
        .ok_or(StoreError::Malformed(name))
}

// ── Cab record ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CabRecord {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Current city; while on a trip this is still the origin.
    pub location: String,
    /// Destination city; empty unless on a trip.
    pub destination: String,
    pub state: CabState,
    /// Idle-ranking key: Unix seconds of the last activity.
    pub last_activity: UnixSecs,
    /// 0 = unleased, else the acquisition timestamp of the current lease.
    pub lease: UnixSecs,
    pub history: Vec<String>,
}

impl CabRecord {
    pub fn key(&self) -> Key {
        cab_key(&self.id)
    }

    pub fn from_item(item: &Item) -> Result<Self, StoreError> {
        let state_str = get_s(item, attr::STATE)?;
        let state = CabState::parse(&state_str).ok_or(StoreError::Malformed(attr::STATE))?;
        Ok(Self {
            id: get_s(item, attr::ID)?,
            name: get_s(item, attr::NAME)?,
            category: get_s(item, attr::CATEGORY)?,
            location: get_s(item, attr::LOCATION)?,
            destination: get_s(item, attr::DESTINATION)?,
            state,
            last_activity: get_n(item, attr::LAST_ACTIVITY)?,
            lease: get_n(item, attr::LEASE)?,
            history: get_ss(item, attr::HISTORY)?,
        })
    }

    pub fn to_item(&self) -> Item {
        Item::from([
            (attr::ID.to_string(), Attr::s(&self.id)),
            (attr::NAME.to_string(), Attr::s(&self.name)),
            (attr::CATEGORY.to_string(), Attr::s(&self.category)),
            (attr::LOCATION.to_string(), Attr::s(&self.location)),
            (attr::DESTINATION.to_string(), Attr::s(&self.destination)),
            (attr::STATE.to_string(), Attr::s(self.state.as_str())),
            (attr::LAST_ACTIVITY.to_string(), Attr::n(self.last_activity)),
            (attr::LEASE.to_string(), Attr::n(self.lease)),
            (attr::HISTORY.to_string(), Attr::ss(self.history.clone())),
        ])
    }

    /// Next history entry: the current length doubles as the sequence number.
    pub fn next_history_entry(&self, body: &str) -> String {
        format!("{}. {}", self.history.len(), body)
    }
}

pub fn cab_key(id: &str) -> Key {
    Key::new(PART_RESOURCES, id)
}

// ── City record ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CityRecord {
    pub id: String,
    pub name: String,
    /// Monotonically incremented booking counter.
    pub demand: i64,
}

impl CityRecord {
    pub fn key(&self) -> Key {
        city_key(&self.id)
    }

    pub fn from_item(item: &Item) -> Result<Self, StoreError> {
        Ok(Self {
            id: get_s(item, attr::ID)?,
            name: get_s(item, attr::NAME)?,
            demand: get_n(item, attr::DEMAND)?,
        })
    }

    pub fn to_item(&self) -> Item {
        Item::from([
            (attr::ID.to_string(), Attr::s(&self.id)),
            (attr::NAME.to_string(), Attr::s(&self.name)),
            (attr::DEMAND.to_string(), Attr::n(self.demand)),
        ])
    }
}

pub fn city_key(id: &str) -> Key {
    Key::new(PART_LOCATIONS, id)
}

pub fn counter_key(category: &str) -> Key {
    Key::new(PART_COUNTERS, category)
}

// ── History ordering ─────────────────────────────────────

/// The store holds `History` as an unordered string set; each entry embeds
/// its sequence number precisely so order can be recovered.
pub fn history_seq(entry: &str) -> Option<u64> {
    entry.split('.').next()?.parse().ok()
}

pub fn sort_history(entries: &mut [String]) {
    entries.sort_by_key(|e| history_seq(e).unwrap_or(u64::MAX));
}
