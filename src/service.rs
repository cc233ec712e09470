use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::*;
use crate::engine::{Engine, EngineError};

pub type AppState = Arc<Engine>;

pub fn router(engine: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/cities", post(onboard_city))
        .route("/api/cities/demand", get(demand_ranking))
        .route("/api/cabs", post(register_cab))
        .route("/api/cabs/deactivate", post(deactivate_cab))
        .route("/api/cabs/activate", post(activate_cab))
        .route("/api/cabs/relocate", post(relocate_cab))
        .route("/api/cabs/{id}/history", get(cab_history))
        .route("/api/bookings", post(book_cab))
        .route("/api/trips/end", post(end_trip))
        .with_state(engine)
}

/// Contention outcomes map to 409 so callers can tell "retry the request"
/// apart from transport failures (500) and bad input (400).
fn error_response(e: EngineError) -> Response {
    let status = match &e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Busy(_)
        | EngineError::Conflict(_)
        | EngineError::Expired
        | EngineError::Invalid => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

fn bad_request(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: msg })).into_response()
}

// ── Handlers ────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn onboard_city(
    State(engine): State<AppState>,
    Json(req): Json<OnboardCityRequest>,
) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.onboard_city(&req.name).await {
        Ok(id) => (StatusCode::CREATED, Json(CreatedResponse { id })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn register_cab(
    State(engine): State<AppState>,
    Json(req): Json<RegisterCabRequest>,
) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.register_cab(&req.name, &req.category, &req.city_id).await {
        Ok(id) => (StatusCode::CREATED, Json(CreatedResponse { id })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn book_cab(State(engine): State<AppState>, Json(req): Json<BookingRequest>) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.assign_cab(&req.from, &req.to, &req.category).await {
        Ok(assignment) => Json(BookingResponse {
            cab: assignment.map(|a| BookedCab {
                id: a.cab_id,
                name: a.cab_name,
                category: a.category,
            }),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn end_trip(State(engine): State<AppState>, Json(req): Json<EndTripRequest>) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.end_trip(&req.cab_id, req.city_id.as_deref()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn deactivate_cab(
    State(engine): State<AppState>,
    Json(req): Json<CabIdRequest>,
) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.deactivate_cab(&req.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn activate_cab(State(engine): State<AppState>, Json(req): Json<CabIdRequest>) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.activate_cab(&req.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn relocate_cab(
    State(engine): State<AppState>,
    Json(req): Json<RelocateCabRequest>,
) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    match engine.relocate_cab(&req.cab_id, &req.city_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn demand_ranking(State(engine): State<AppState>) -> Response {
    match engine.demand_ranking().await {
        Ok(cities) => Json(DemandResponse {
            cities: cities
                .into_iter()
                .map(|c| CityDemandEntry {
                    city_id: c.city_id,
                    city_name: c.city_name,
                    demand: c.demand,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn cab_history(State(engine): State<AppState>, Path(id): Path<String>) -> Response {
    match engine.cab_history(&id).await {
        Ok(history) => Json(CabHistoryResponse { history }).into_response(),
        Err(e) => error_response(e),
    }
}
