use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::parse_id;
use crate::auth::Actor;
use crate::error::AppError;
use crate::models::user::{GeoPoint, Role};
use crate::presence::LocationOutcome;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers/:id/location", post(update_driver_location))
        .route("/drivers/:id/availability", get(driver_availability))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

#[derive(Serialize)]
pub struct UpdateLocationResponse {
    pub outcome: LocationOutcome,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub driver_id: Uuid,
    pub online: bool,
    pub busy: bool,
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<(StatusCode, Json<UpdateLocationResponse>), AppError> {
    let id = parse_id("driver", &id)?;
    actor.require_role(Role::Driver)?;
    actor.require_self(id)?;

    let outcome = state
        .presence
        .update_location(id, GeoPoint::from_coordinates(payload.coordinates))?;

    Ok((StatusCode::ACCEPTED, Json(UpdateLocationResponse { outcome })))
}

async fn driver_availability(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let id = parse_id("driver", &id)?;
    if actor.role != Role::Admin {
        actor.require_self(id)?;
    }

    let driver = state
        .store
        .get_user(id)
        .await?
        .filter(|user| user.is_driver())
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(AvailabilityResponse {
        driver_id: driver.id,
        online: state.presence.get_connection(driver.id).is_some(),
        busy: state.presence.is_busy(driver.id).await?,
    }))
}
