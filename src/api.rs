//! Plain request/response records for the service layer.

use serde::{Deserialize, Serialize};

// ── Requests ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct OnboardCityRequest {
    pub name: String,
}

impl OnboardCityRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterCabRequest {
    pub name: String,
    pub category: String,
    pub city_id: String,
}

impl RegisterCabRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.category.is_empty() || self.city_id.is_empty() {
            return Err("name, category and city_id are required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct BookingRequest {
    pub from: String,
    pub to: String,
    pub category: String,
}

impl BookingRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.from.is_empty() || self.to.is_empty() || self.category.is_empty() {
            return Err("from, to and category are required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct EndTripRequest {
    pub cab_id: String,
    #[serde(default)]
    pub city_id: Option<String>,
}

impl EndTripRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.cab_id.is_empty() {
            return Err("cab_id is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CabIdRequest {
    pub id: String,
}

impl CabIdRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id is required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct RelocateCabRequest {
    pub cab_id: String,
    pub city_id: String,
}

impl RelocateCabRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.cab_id.is_empty() || self.city_id.is_empty() {
            return Err("cab_id and city_id are required".into());
        }
        Ok(())
    }
}

// ── Responses ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct BookedCab {
    pub id: String,
    pub name: String,
    pub category: String,
}

/// `cab: null` means no cab matched — a successful empty result.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub cab: Option<BookedCab>,
}

#[derive(Debug, Serialize)]
pub struct CityDemandEntry {
    pub city_id: String,
    pub city_name: String,
    pub demand: i64,
}

#[derive(Debug, Serialize)]
pub struct DemandResponse {
    pub cities: Vec<CityDemandEntry>,
}

#[derive(Debug, Serialize)]
pub struct CabHistoryResponse {
    pub history: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
