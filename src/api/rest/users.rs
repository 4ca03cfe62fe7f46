use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::parse_id;
use crate::auth::Actor;
use crate::error::AppError;
use crate::geo::validate_point;
use crate::models::user::{GeoPoint, Role, User};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", post(register_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/profile", patch(update_profile))
}

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub name: String,
    pub email: String,
    pub mobile: Option<String>,
    pub role: String,
    /// `[longitude, latitude]`
    pub coordinates: Option<[f64; 2]>,
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub role: Option<String>,
    pub mobile: Option<String>,
}

async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("a valid email is required".to_string()));
    }
    let role: Role = payload.role.parse()?;

    let location = payload.coordinates.map(GeoPoint::from_coordinates);
    if let Some(point) = &location {
        validate_point(point)?;
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        email: email.to_string(),
        mobile: payload.mobile,
        role,
        location,
        created_at: now,
        updated_at: now,
    };

    let user = state.store.insert_user(user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let id = parse_id("user", &id)?;
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))?;

    Ok(Json(user))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    let id = parse_id("user", &id)?;
    actor.require_self(id)?;

    let (Some(role), Some(mobile)) = (payload.role, payload.mobile) else {
        return Err(AppError::BadRequest(
            "role and mobile are required".to_string(),
        ));
    };
    let role: Role = role.parse()?;
    if role == Role::Admin && actor.role != Role::Admin {
        return Err(AppError::Forbidden(
            "cannot grant yourself the admin role".to_string(),
        ));
    }
    if mobile.trim().is_empty() {
        return Err(AppError::BadRequest("mobile cannot be empty".to_string()));
    }

    let user = state
        .store
        .update_user_profile(id, role, mobile.trim().to_string())
        .await?;
    Ok(Json(user))
}
