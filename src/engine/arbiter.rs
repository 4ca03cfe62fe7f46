use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderStatus};
use crate::notifier::{EventName, EventNotifier, Target};
use crate::observability::metrics::Metrics;
use crate::presence::PresenceTracker;
use crate::store::Store;

#[derive(Serialize)]
struct AcceptedPayload<'a> {
    assignment: &'a Assignment,
    order: &'a Order,
}

#[derive(Serialize)]
struct WithdrawnPayload {
    assignment_id: Uuid,
    order_id: Uuid,
}

#[derive(Serialize)]
pub(crate) struct StatusChangedPayload {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub assigned_driver: Option<Uuid>,
}

impl StatusChangedPayload {
    pub(crate) fn of(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            assigned_driver: order.assigned_driver,
        }
    }
}

/// Resolves the race among drivers for a broadcast assignment. All state
/// checks happen inside a single conditional store operation.
pub struct AssignmentArbiter {
    store: Arc<dyn Store>,
    presence: Arc<PresenceTracker>,
    notifier: Arc<EventNotifier>,
    metrics: Metrics,
}

impl AssignmentArbiter {
    pub fn new(
        store: Arc<dyn Store>,
        presence: Arc<PresenceTracker>,
        notifier: Arc<EventNotifier>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            presence,
            notifier,
            metrics,
        }
    }

    /// A `Conflict` means the offer is gone or the driver is ineligible;
    /// retrying the same assignment will not succeed.
    pub async fn accept(&self, assignment_id: Uuid, driver_id: Uuid) -> Result<Assignment, AppError> {
        let result = self.store.accept_assignment(assignment_id, driver_id).await;

        let outcome = match &result {
            Ok(_) => "won",
            Err(AppError::Conflict(_)) => "conflict",
            Err(_) => "error",
        };
        self.metrics.accept_total.with_label_values(&[outcome]).inc();

        let (assignment, order) = result?;

        info!(
            assignment_id = %assignment.id,
            order_id = %order.id,
            driver_id = %driver_id,
            "assignment accepted"
        );

        let accepted = AcceptedPayload {
            assignment: &assignment,
            order: &order,
        };
        self.notifier.emit(
            EventName::AssignmentAccepted,
            &accepted,
            self.presence.target_for(order.customer_id),
        );
        self.notifier
            .emit(EventName::AssignmentAccepted, &accepted, Target::ADMINS);

        self.withdraw(&assignment, assignment.other_candidates(driver_id));

        Ok(assignment)
    }

    pub async fn complete(&self, assignment_id: Uuid, driver_id: Uuid) -> Result<Order, AppError> {
        let (assignment, order) = self
            .store
            .complete_assignment(assignment_id, driver_id)
            .await?;

        self.metrics
            .status_transitions_total
            .with_label_values(&[order.status.as_str()])
            .inc();
        info!(
            assignment_id = %assignment.id,
            order_id = %order.id,
            driver_id = %driver_id,
            "delivery completed; driver available"
        );

        let payload = StatusChangedPayload::of(&order);
        self.notifier.emit(
            EventName::OrderStatusChanged,
            &payload,
            self.presence.target_for(order.customer_id),
        );
        self.notifier
            .emit(EventName::OrderStatusChanged, &payload, Target::ADMINS);

        Ok(order)
    }

    /// Expires an unaccepted broadcast and pulls the offer from every candidate.
    pub async fn cancel(&self, assignment_id: Uuid) -> Result<Assignment, AppError> {
        let (assignment, order) = self.store.expire_assignment(assignment_id).await?;

        info!(
            assignment_id = %assignment.id,
            order_id = %order.id,
            "assignment expired"
        );

        self.withdraw(&assignment, assignment.broadcasted_to.iter().copied());
        Ok(assignment)
    }

    fn withdraw(&self, assignment: &Assignment, drivers: impl Iterator<Item = Uuid>) {
        let payload = WithdrawnPayload {
            assignment_id: assignment.id,
            order_id: assignment.order_id,
        };
        for driver_id in drivers {
            self.notifier.emit(
                EventName::AssignmentWithdrawn,
                &payload,
                self.presence.target_for(driver_id),
            );
        }
    }
}
