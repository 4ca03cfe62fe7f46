use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::api::rest::parse_id;
use crate::auth::Actor;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::Order;
use crate::models::user::Role;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assignments/:id", get(get_assignment))
        .route("/assignments/:id/accept", post(accept_assignment))
        .route("/assignments/:id/complete", post(complete_assignment))
        .route("/assignments/:id/cancel", post(cancel_assignment))
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub assignment: Assignment,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order: Order,
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AssignmentResponse>, AppError> {
    let id = parse_id("assignment", &id)?;
    let assignment = state
        .store
        .get_assignment(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("assignment {id} not found")))?;

    let visible = actor.role == Role::Admin || assignment.is_candidate(actor.id);
    if !visible {
        return Err(AppError::Forbidden(format!(
            "assignment {id} was not offered to this user"
        )));
    }

    Ok(Json(AssignmentResponse { assignment }))
}

async fn accept_assignment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AssignmentResponse>, AppError> {
    let id = parse_id("assignment", &id)?;
    actor.require_role(Role::Driver)?;

    let assignment = state.arbiter.accept(id, actor.id).await?;
    Ok(Json(AssignmentResponse { assignment }))
}

async fn complete_assignment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let id = parse_id("assignment", &id)?;
    actor.require_role(Role::Driver)?;

    let order = state.arbiter.complete(id, actor.id).await?;
    Ok(Json(OrderResponse { order }))
}

async fn cancel_assignment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<AssignmentResponse>, AppError> {
    let id = parse_id("assignment", &id)?;
    actor.require_role(Role::Admin)?;

    let assignment = state.arbiter.cancel(id).await?;
    Ok(Json(AssignmentResponse { assignment }))
}
