use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::Order;
use crate::models::user::{DriverSummary, NearbyDriver};
use crate::notifier::{EventName, EventNotifier, Target};
use crate::observability::metrics::Metrics;
use crate::presence::PresenceTracker;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub assignment: Option<Assignment>,
    /// The order as stored after the assignment was linked.
    pub order: Option<Order>,
    pub available_drivers: Vec<DriverSummary>,
    /// Candidates whose offer was handed to a live connection.
    pub notified: Vec<Uuid>,
}

#[derive(Serialize)]
struct OfferPayload<'a> {
    assignment: &'a Assignment,
    order: &'a Order,
}

pub struct DispatchEngine {
    store: Arc<dyn Store>,
    presence: Arc<PresenceTracker>,
    notifier: Arc<EventNotifier>,
    radius_km: f64,
    metrics: Metrics,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        presence: Arc<PresenceTracker>,
        notifier: Arc<EventNotifier>,
        radius_km: f64,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            presence,
            notifier,
            radius_km,
            metrics,
        }
    }

    pub async fn dispatch(&self, order: &Order) -> Result<DispatchOutcome, AppError> {
        let start = Instant::now();
        let result = self.broadcast(order).await;

        let outcome = match &result {
            Ok(dispatched) if dispatched.assignment.is_some() => "broadcasted",
            Ok(_) => "no_candidates",
            Err(_) => "error",
        };
        self.metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .dispatch_total
            .with_label_values(&[outcome])
            .inc();

        if let Err(err) = &result {
            error!(order_id = %order.id, error = %err, "dispatch failed");
        }
        result
    }

    async fn broadcast(&self, order: &Order) -> Result<DispatchOutcome, AppError> {
        let candidates = self.candidates(order).await?;

        if candidates.is_empty() {
            info!(
                order_id = %order.id,
                radius_km = self.radius_km,
                "no available drivers nearby; order left unassigned"
            );
            return Ok(DispatchOutcome::default());
        }

        let assignment = Assignment::broadcast(
            order.id,
            candidates.iter().map(|nearby| nearby.driver.id).collect(),
        );

        // Offers go out only once the assignment is durable.
        let linked_order = self.store.commit_dispatch(assignment.clone()).await?;

        let payload = OfferPayload {
            assignment: &assignment,
            order: &linked_order,
        };
        let mut notified = Vec::new();
        for candidate in &candidates {
            let driver_id = candidate.driver.id;
            match self.presence.get_connection(driver_id) {
                Some(connection) => {
                    if self.notifier.emit(
                        EventName::NewAssignmentOffer,
                        &payload,
                        Target::Connection(connection),
                    ) {
                        notified.push(driver_id);
                    }
                }
                None => debug!(driver_id = %driver_id, "candidate offline; offer not pushed"),
            }
        }

        info!(
            order_id = %order.id,
            assignment_id = %assignment.id,
            candidates = candidates.len(),
            notified = notified.len(),
            "assignment broadcasted"
        );

        Ok(DispatchOutcome {
            available_drivers: candidates.iter().map(NearbyDriver::summary).collect(),
            assignment: Some(assignment),
            order: Some(linked_order),
            notified,
        })
    }

    /// Nearby drivers minus those already on an accepted delivery. Drivers
    /// holding only unaccepted offers stay eligible.
    async fn candidates(&self, order: &Order) -> Result<Vec<NearbyDriver>, AppError> {
        let nearby = self
            .store
            .drivers_within(order.address.location, self.radius_km)
            .await?;

        let ids: Vec<Uuid> = nearby.iter().map(|n| n.driver.id).collect();
        let busy = self.store.busy_drivers(&ids).await?;

        Ok(nearby
            .into_iter()
            .filter(|n| !busy.contains(&n.driver.id))
            .collect())
    }
}
