//! Persistence boundary for users, orders and assignments.
//!
//! Every mutation that can race is a single conditional operation on the
//! store (compare current status, then write). Callers never read a record,
//! modify it, and write it back.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderStatus};
use crate::models::user::{GeoPoint, NearbyDriver, Role, User};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreCounts {
    pub users: usize,
    pub orders: usize,
    pub assignments: usize,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: User) -> Result<User, AppError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn update_user_profile(
        &self,
        id: Uuid,
        role: Role,
        mobile: String,
    ) -> Result<User, AppError>;
    async fn update_driver_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<(), AppError>;
    /// Drivers with a known location within `radius_km` of `center`, nearest first.
    async fn drivers_within(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, AppError>;

    async fn insert_order(&self, order: Order) -> Result<Order, AppError>;
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError>;
    /// Newest first; `customer_id` narrows the listing to one customer.
    async fn list_orders(&self, customer_id: Option<Uuid>) -> Result<Vec<Order>, AppError>;
    /// Moves the order from `expected` to `next`, or fails with `Conflict`
    /// when the stored status is no longer `expected`.
    async fn transition_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, AppError>;

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, AppError>;
    /// Subset of `driver_ids` currently holding an accepted, uncompleted assignment.
    async fn busy_drivers(&self, driver_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError>;
    /// Stores a broadcast assignment and links it to its order in one step.
    /// Fails with `Conflict` if the order already has a live assignment or is
    /// not out for delivery.
    async fn commit_dispatch(&self, assignment: Assignment) -> Result<Order, AppError>;
    /// broadcasted -> assigned, only for a listed, non-busy candidate.
    async fn accept_assignment(
        &self,
        assignment_id: Uuid,
        driver_id: Uuid,
    ) -> Result<(Assignment, Order), AppError>;
    /// assigned -> completed and the order out_for_delivery -> delivered.
    async fn complete_assignment(
        &self,
        assignment_id: Uuid,
        driver_id: Uuid,
    ) -> Result<(Assignment, Order), AppError>;
    /// broadcasted -> expired; detaches the assignment from its order.
    async fn expire_assignment(&self, assignment_id: Uuid)
        -> Result<(Assignment, Order), AppError>;
    /// Ids of broadcasted assignments created before `older_than`.
    async fn stale_broadcasts(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>, AppError>;

    async fn counts(&self) -> Result<StoreCounts, AppError>;
    async fn shutdown(&self);
}
