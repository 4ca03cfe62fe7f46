use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::Actor;
use crate::engine::arbiter::{AssignmentArbiter, StatusChangedPayload};
use crate::engine::dispatch::{DispatchEngine, DispatchOutcome};
use crate::error::AppError;
use crate::geo::validate_delivery_point;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{DeliveryAddress, LineItem, Order, OrderStatus, PaymentMethod};
use crate::models::user::{DriverSummary, Role};
use crate::notifier::{EventName, EventNotifier, Target};
use crate::observability::metrics::Metrics;
use crate::presence::PresenceTracker;
use crate::store::Store;

const TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub items: Vec<LineItem>,
    pub total_amount: f64,
    pub payment_method: PaymentMethod,
    pub address: DeliveryAddress,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    pub assignment: Option<Assignment>,
    pub available_drivers: Vec<DriverSummary>,
    pub notified: Vec<Uuid>,
}

impl TransitionOutcome {
    fn settled(order: Order, assignment: Option<Assignment>) -> Self {
        Self {
            order,
            assignment,
            available_drivers: Vec::new(),
            notified: Vec::new(),
        }
    }

    fn dispatched(order: Order, dispatched: DispatchOutcome) -> Self {
        Self {
            order: dispatched.order.unwrap_or(order),
            assignment: dispatched.assignment,
            available_drivers: dispatched.available_drivers,
            notified: dispatched.notified,
        }
    }
}

pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    dispatch: Arc<DispatchEngine>,
    arbiter: Arc<AssignmentArbiter>,
    presence: Arc<PresenceTracker>,
    notifier: Arc<EventNotifier>,
    metrics: Metrics,
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        dispatch: Arc<DispatchEngine>,
        arbiter: Arc<AssignmentArbiter>,
        presence: Arc<PresenceTracker>,
        notifier: Arc<EventNotifier>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            dispatch,
            arbiter,
            presence,
            notifier,
            metrics,
        }
    }

    pub async fn create_order(&self, actor: &Actor, draft: NewOrder) -> Result<Order, AppError> {
        actor.require_role(Role::Customer)?;
        validate_draft(&draft)?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            customer_id: actor.id,
            items: draft.items,
            total_amount: draft.total_amount,
            payment_method: draft.payment_method,
            is_paid: false,
            address: draft.address,
            status: OrderStatus::Pending,
            assignment: None,
            assigned_driver: None,
            created_at: now,
            updated_at: now,
        };

        let order = self.store.insert_order(order).await?;
        info!(order_id = %order.id, customer_id = %order.customer_id, "order placed");

        self.notifier.emit(EventName::NewOrder, &order, Target::ADMINS);
        Ok(order)
    }

    /// Transition from an untyped request: the order must exist before the
    /// requested status is validated.
    pub async fn transition_status_named(
        &self,
        order_id: Uuid,
        requested: Option<&str>,
        actor: &Actor,
    ) -> Result<TransitionOutcome, AppError> {
        actor.require_role(Role::Admin)?;
        self.load(order_id).await?;

        let requested: OrderStatus = requested
            .ok_or_else(|| AppError::BadRequest("missing status".to_string()))?
            .parse()?;
        self.transition_status(order_id, requested, actor).await
    }

    pub async fn transition_status(
        &self,
        order_id: Uuid,
        requested: OrderStatus,
        actor: &Actor,
    ) -> Result<TransitionOutcome, AppError> {
        actor.require_role(Role::Admin)?;

        // A lost race re-reads the order and decides again.
        for _ in 0..TRANSITION_ATTEMPTS {
            let order = self.load(order_id).await?;

            if requested == order.status {
                return self.repeat(order).await;
            }

            if !order.status.can_advance_to(requested) {
                return Err(AppError::BadRequest(format!(
                    "cannot move order from {} to {requested}",
                    order.status
                )));
            }

            if requested == OrderStatus::Delivered {
                match self.settle_assignment(&order).await {
                    Ok(Some(settled)) => return Ok(settled),
                    Ok(None) => {}
                    Err(AppError::Conflict(reason)) => {
                        debug!(order_id = %order.id, reason = %reason, "assignment moved while settling; re-reading");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let updated = match self
                .store
                .transition_order_status(order.id, order.status, requested)
                .await
            {
                Ok(updated) => updated,
                Err(AppError::Conflict(reason)) => {
                    debug!(order_id = %order.id, reason = %reason, "order changed concurrently; re-reading");
                    continue;
                }
                Err(err) => return Err(err),
            };

            self.metrics
                .status_transitions_total
                .with_label_values(&[requested.as_str()])
                .inc();
            info!(order_id = %order.id, from = %order.status, to = %requested, "order status changed");

            let needs_dispatch =
                updated.status == OrderStatus::OutForDelivery && updated.assignment.is_none();
            let outcome = if needs_dispatch {
                self.dispatch_after_commit(updated).await
            } else {
                TransitionOutcome::settled(updated, None)
            };

            self.announce(&outcome.order);
            return Ok(outcome);
        }

        Err(AppError::Conflict(format!(
            "order {order_id} kept changing; retry the request"
        )))
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    /// The order as stored now, with its linked assignment.
    async fn current(&self, order_id: Uuid) -> Result<TransitionOutcome, AppError> {
        let order = self.load(order_id).await?;
        self.with_assignment(order).await
    }

    async fn with_assignment(&self, order: Order) -> Result<TransitionOutcome, AppError> {
        let assignment = match order.assignment {
            Some(id) => self.store.get_assignment(id).await?,
            None => None,
        };
        Ok(TransitionOutcome::settled(order, assignment))
    }

    /// Same-status requests change nothing, except that an order out for
    /// delivery without a live assignment gets another dispatch attempt.
    async fn repeat(&self, order: Order) -> Result<TransitionOutcome, AppError> {
        if order.status == OrderStatus::OutForDelivery && order.assignment.is_none() {
            info!(order_id = %order.id, "re-attempting dispatch for unassigned order");
            return match self.dispatch.dispatch(&order).await {
                Ok(dispatched) => Ok(TransitionOutcome::dispatched(order, dispatched)),
                // A concurrent request linked an assignment first.
                Err(AppError::Conflict(_)) => self.current(order.id).await,
                Err(err) => Err(err),
            };
        }

        self.with_assignment(order).await
    }

    /// The status is already durable, so a failed dispatch leaves the order
    /// unassigned rather than failing the transition.
    async fn dispatch_after_commit(&self, order: Order) -> TransitionOutcome {
        match self.dispatch.dispatch(&order).await {
            Ok(dispatched) => TransitionOutcome::dispatched(order, dispatched),
            Err(AppError::Conflict(_)) => match self.current(order.id).await {
                Ok(current) => current,
                Err(_) => TransitionOutcome::settled(order, None),
            },
            Err(err) => {
                error!(
                    order_id = %order.id,
                    error = %err,
                    "order is out for delivery but no assignment was created"
                );
                TransitionOutcome::settled(order, None)
            }
        }
    }

    /// An admin marking an order delivered closes out its assignment: an
    /// accepted one is completed (freeing the driver), an open broadcast is
    /// cancelled. Returns the finished outcome when completion already moved
    /// the order to delivered.
    async fn settle_assignment(&self, order: &Order) -> Result<Option<TransitionOutcome>, AppError> {
        let Some(assignment_id) = order.assignment else {
            return Ok(None);
        };
        let Some(assignment) = self.store.get_assignment(assignment_id).await? else {
            return Ok(None);
        };

        match (assignment.status, assignment.assigned_to) {
            (AssignmentStatus::Assigned, Some(driver_id)) => {
                let delivered = self.arbiter.complete(assignment.id, driver_id).await?;
                let assignment = self.store.get_assignment(assignment.id).await?;
                Ok(Some(TransitionOutcome::settled(delivered, assignment)))
            }
            (AssignmentStatus::Broadcasted, _) => {
                self.arbiter.cancel(assignment.id).await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn announce(&self, order: &Order) {
        let payload = StatusChangedPayload::of(order);
        self.notifier.emit(
            EventName::OrderStatusChanged,
            &payload,
            self.presence.target_for(order.customer_id),
        );
        self.notifier
            .emit(EventName::OrderStatusChanged, &payload, Target::ADMINS);
    }
}

fn validate_draft(draft: &NewOrder) -> Result<(), AppError> {
    if draft.items.is_empty() {
        return Err(AppError::BadRequest("order has no items".to_string()));
    }
    for item in &draft.items {
        if item.quantity == 0 {
            return Err(AppError::BadRequest(format!(
                "item {} has zero quantity",
                item.product_id
            )));
        }
        if !item.unit_price.is_finite() || item.unit_price < 0.0 {
            return Err(AppError::BadRequest(format!(
                "item {} has an invalid price",
                item.product_id
            )));
        }
    }
    if !draft.total_amount.is_finite() || draft.total_amount < 0.0 {
        return Err(AppError::BadRequest(
            "total amount must be a non-negative number".to_string(),
        ));
    }
    validate_delivery_point(&draft.address.location)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{validate_draft, NewOrder};
    use crate::models::order::{DeliveryAddress, LineItem, PaymentMethod};
    use crate::models::user::GeoPoint;

    fn draft(lat: f64, lng: f64) -> NewOrder {
        NewOrder {
            items: vec![LineItem {
                product_id: Uuid::new_v4(),
                name: "Milk".to_string(),
                unit_price: 1.5,
                unit: "1 L".to_string(),
                quantity: 2,
            }],
            total_amount: 3.0,
            payment_method: PaymentMethod::Online,
            address: DeliveryAddress {
                full_name: "Test Customer".to_string(),
                mobile: "5550100".to_string(),
                full_address: "1 Test Street".to_string(),
                city: "Pune".to_string(),
                state: "MH".to_string(),
                pincode: "411001".to_string(),
                location: GeoPoint { lat, lng },
            },
        }
    }

    #[test]
    fn accepts_well_formed_order() {
        assert!(validate_draft(&draft(18.52, 73.85)).is_ok());
    }

    #[test]
    fn rejects_bad_delivery_coordinates() {
        assert!(validate_draft(&draft(91.0, 73.85)).is_err());
        assert!(validate_draft(&draft(18.52, 181.0)).is_err());
        assert!(validate_draft(&draft(0.0, 0.0)).is_err());
    }

    #[test]
    fn rejects_empty_items_and_negative_totals() {
        let mut empty = draft(18.52, 73.85);
        empty.items.clear();
        assert!(validate_draft(&empty).is_err());

        let mut negative = draft(18.52, 73.85);
        negative.total_amount = -1.0;
        assert!(validate_draft(&negative).is_err());
    }
}
