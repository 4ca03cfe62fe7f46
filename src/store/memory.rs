use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::user::{GeoPoint, NearbyDriver, Role, User};
use crate::store::{Store, StoreCounts};

/// Process-local store.
///
/// Lock order for multi-record operations is orders -> assignments ->
/// driver claims. No operation holds two entries of the same map.
pub struct InMemoryStore {
    users: DashMap<Uuid, User>,
    emails: DashMap<String, Uuid>,
    orders: DashMap<Uuid, Order>,
    assignments: DashMap<Uuid, Assignment>,
    /// driver id -> the assignment they have accepted and not yet completed.
    active_deliveries: DashMap<Uuid, Uuid>,
    open: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            emails: DashMap::new(),
            orders: DashMap::new(),
            assignments: DashMap::new(),
            active_deliveries: DashMap::new(),
            open: AtomicBool::new(true),
        }
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(AppError::Unavailable)
        }
    }

    fn order_id_of(&self, assignment_id: Uuid) -> Result<Uuid, AppError> {
        self.assignments
            .get(&assignment_id)
            .map(|assignment| assignment.order_id)
            .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))
    }
}

fn missing_order(order_id: Uuid) -> AppError {
    AppError::Internal(format!("assignment references missing order {order_id}"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_user(&self, user: User) -> Result<User, AppError> {
        self.ensure_open()?;

        let email = user.email.trim().to_ascii_lowercase();
        match self.emails.entry(email) {
            Entry::Occupied(entry) => Err(AppError::Conflict(format!(
                "email {} already registered",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(user.id);
                self.users.insert(user.id, user.clone());
                Ok(user)
            }
        }
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.ensure_open()?;
        Ok(self.users.get(&id).map(|user| user.value().clone()))
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        role: Role,
        mobile: String,
    ) -> Result<User, AppError> {
        self.ensure_open()?;

        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("user {id} not found")))?;

        user.role = role;
        user.mobile = Some(mobile);
        user.updated_at = Utc::now();

        Ok(user.clone())
    }

    async fn update_driver_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<(), AppError> {
        self.ensure_open()?;

        let mut user = self
            .users
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        if !user.is_driver() {
            return Err(AppError::BadRequest(format!(
                "user {driver_id} is not a driver"
            )));
        }

        user.location = Some(location);
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn drivers_within(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, AppError> {
        self.ensure_open()?;

        let mut nearby: Vec<NearbyDriver> = self
            .users
            .iter()
            .filter_map(|entry| {
                let user = entry.value();
                if !user.is_driver() {
                    return None;
                }
                let location = user.location?;
                let distance_km = haversine_km(&center, &location);

                if distance_km <= radius_km {
                    Some(NearbyDriver {
                        driver: user.clone(),
                        location,
                        distance_km,
                    })
                } else {
                    None
                }
            })
            .collect();

        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(nearby)
    }

    async fn insert_order(&self, order: Order) -> Result<Order, AppError> {
        self.ensure_open()?;
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        self.ensure_open()?;
        Ok(self.orders.get(&id).map(|order| order.value().clone()))
    }

    async fn list_orders(&self, customer_id: Option<Uuid>) -> Result<Vec<Order>, AppError> {
        self.ensure_open()?;

        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| customer_id.is_none_or(|id| entry.customer_id == id))
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_order_status(
        &self,
        id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, AppError> {
        self.ensure_open()?;

        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

        if order.status != expected {
            return Err(AppError::Conflict(format!(
                "order {id} is {}, expected {expected}",
                order.status
            )));
        }
        if next == OrderStatus::Delivered {
            if let Some(assignment_id) = order.assignment {
                let live = self.assignments.get(&assignment_id).is_some_and(|a| {
                    matches!(
                        a.status,
                        AssignmentStatus::Broadcasted | AssignmentStatus::Assigned
                    )
                });
                if live {
                    return Err(AppError::Conflict(format!(
                        "order {id} still has live assignment {assignment_id}"
                    )));
                }
            }
        }

        order.status = next;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, AppError> {
        self.ensure_open()?;
        Ok(self
            .assignments
            .get(&id)
            .map(|assignment| assignment.value().clone()))
    }

    async fn busy_drivers(&self, driver_ids: &[Uuid]) -> Result<HashSet<Uuid>, AppError> {
        self.ensure_open()?;
        Ok(driver_ids
            .iter()
            .copied()
            .filter(|id| self.active_deliveries.contains_key(id))
            .collect())
    }

    async fn commit_dispatch(&self, assignment: Assignment) -> Result<Order, AppError> {
        self.ensure_open()?;

        let order_id = assignment.order_id;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.status != OrderStatus::OutForDelivery {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {}, not out_for_delivery",
                order.status
            )));
        }
        if let Some(existing) = order.assignment {
            return Err(AppError::Conflict(format!(
                "order {order_id} already has assignment {existing}"
            )));
        }

        order.assignment = Some(assignment.id);
        order.updated_at = Utc::now();
        self.assignments.insert(assignment.id, assignment);

        Ok(order.clone())
    }

    async fn accept_assignment(
        &self,
        assignment_id: Uuid,
        driver_id: Uuid,
    ) -> Result<(Assignment, Order), AppError> {
        self.ensure_open()?;

        let order_id = self.order_id_of(assignment_id)?;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| missing_order(order_id))?;
        let mut assignment = self
            .assignments
            .get_mut(&assignment_id)
            .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))?;

        if assignment.status != AssignmentStatus::Broadcasted {
            return Err(AppError::Conflict(format!(
                "assignment {assignment_id} is no longer open"
            )));
        }
        if order.status != OrderStatus::OutForDelivery {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {}, not out_for_delivery",
                order.status
            )));
        }
        if !assignment.is_candidate(driver_id) {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} was not offered assignment {assignment_id}"
            )));
        }

        match self.active_deliveries.entry(driver_id) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!(
                    "driver {driver_id} is already on a delivery"
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(assignment_id);
            }
        }

        let now = Utc::now();
        assignment.status = AssignmentStatus::Assigned;
        assignment.assigned_to = Some(driver_id);
        assignment.updated_at = now;
        order.assigned_driver = Some(driver_id);
        order.updated_at = now;

        Ok((assignment.clone(), order.clone()))
    }

    async fn complete_assignment(
        &self,
        assignment_id: Uuid,
        driver_id: Uuid,
    ) -> Result<(Assignment, Order), AppError> {
        self.ensure_open()?;

        let order_id = self.order_id_of(assignment_id)?;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| missing_order(order_id))?;
        let mut assignment = self
            .assignments
            .get_mut(&assignment_id)
            .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))?;

        if assignment.status != AssignmentStatus::Assigned
            || assignment.assigned_to != Some(driver_id)
        {
            return Err(AppError::Conflict(format!(
                "assignment {assignment_id} is not an active delivery of driver {driver_id}"
            )));
        }
        if order.status != OrderStatus::OutForDelivery {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {}, not out_for_delivery",
                order.status
            )));
        }

        let now = Utc::now();
        assignment.status = AssignmentStatus::Completed;
        assignment.updated_at = now;
        order.status = OrderStatus::Delivered;
        order.updated_at = now;
        self.active_deliveries
            .remove_if(&driver_id, |_, active| *active == assignment_id);

        Ok((assignment.clone(), order.clone()))
    }

    async fn expire_assignment(
        &self,
        assignment_id: Uuid,
    ) -> Result<(Assignment, Order), AppError> {
        self.ensure_open()?;

        let order_id = self.order_id_of(assignment_id)?;
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| missing_order(order_id))?;
        let mut assignment = self
            .assignments
            .get_mut(&assignment_id)
            .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))?;

        if assignment.status != AssignmentStatus::Broadcasted {
            return Err(AppError::Conflict(format!(
                "assignment {assignment_id} is no longer open"
            )));
        }

        let now = Utc::now();
        assignment.status = AssignmentStatus::Expired;
        assignment.updated_at = now;
        if order.assignment == Some(assignment_id) {
            order.assignment = None;
            order.updated_at = now;
        }

        Ok((assignment.clone(), order.clone()))
    }

    async fn stale_broadcasts(&self, older_than: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        self.ensure_open()?;
        Ok(self
            .assignments
            .iter()
            .filter(|entry| {
                entry.status == AssignmentStatus::Broadcasted && entry.created_at < older_than
            })
            .map(|entry| entry.id)
            .collect())
    }

    async fn counts(&self) -> Result<StoreCounts, AppError> {
        self.ensure_open()?;
        Ok(StoreCounts {
            users: self.users.len(),
            orders: self.orders.len(),
            assignments: self.assignments.len(),
        })
    }

    async fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            info!("store closed");
        }
    }
}
