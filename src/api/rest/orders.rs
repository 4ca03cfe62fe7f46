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
use crate::engine::lifecycle::NewOrder;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{DeliveryAddress, LineItem, Order, PaymentMethod};
use crate::models::user::{DriverSummary, GeoPoint, Role};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", post(update_order_status))
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub full_name: String,
    pub mobile: String,
    pub full_address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<LineItem>,
    pub total_amount: f64,
    pub payment_method: PaymentMethod,
    pub address: AddressRequest,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct UpdateStatusResponse {
    pub order: Order,
    pub assignment: Option<Assignment>,
    pub available_drivers: Vec<DriverSummary>,
    pub notified_drivers: Vec<Uuid>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let address = payload.address;
    let draft = NewOrder {
        items: payload.items,
        total_amount: payload.total_amount,
        payment_method: payload.payment_method,
        address: DeliveryAddress {
            full_name: address.full_name,
            mobile: address.mobile,
            full_address: address.full_address,
            city: address.city,
            state: address.state,
            pincode: address.pincode,
            location: GeoPoint {
                lat: address.latitude,
                lng: address.longitude,
            },
        },
    };

    let order = state.lifecycle.create_order(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Order>>, AppError> {
    let scope = match actor.role {
        Role::Admin => None,
        Role::Customer => Some(actor.id),
        Role::Driver => {
            return Err(AppError::Forbidden(
                "drivers cannot list orders".to_string(),
            ));
        }
    };

    Ok(Json(state.store.list_orders(scope).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
) -> Result<Json<Order>, AppError> {
    let id = parse_id("order", &id)?;
    let order = state
        .store
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    let visible = match actor.role {
        Role::Admin => true,
        Role::Customer => order.customer_id == actor.id,
        Role::Driver => order.assigned_driver == Some(actor.id),
    };
    if !visible {
        return Err(AppError::Forbidden(format!(
            "order {id} is not visible to this user"
        )));
    }

    Ok(Json(order))
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, AppError> {
    let id = parse_id("order", &id)?;
    let outcome = state
        .lifecycle
        .transition_status_named(id, payload.status.as_deref(), &actor)
        .await?;

    Ok(Json(UpdateStatusResponse {
        order: outcome.order,
        assignment: outcome.assignment,
        available_drivers: outcome.available_drivers,
        notified_drivers: outcome.notified,
    }))
}
