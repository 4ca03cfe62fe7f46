//! Live connections and driver positions.
//!
//! Connection handles are ephemeral transport state and live only here,
//! never on the durable user record. Location updates take their own
//! queue and writer task so GPS churn never contends with order mutations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{displacement_m, validate_point};
use crate::models::user::GeoPoint;
use crate::notifier::{ConnectionId, EventName, Target};
use crate::observability::metrics::Metrics;
use crate::state::AppState;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct LocationUpdate {
    pub driver_id: Uuid,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationOutcome {
    Queued,
    Throttled,
    Dropped,
}

impl LocationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationOutcome::Queued => "queued",
            LocationOutcome::Throttled => "throttled",
            LocationOutcome::Dropped => "dropped",
        }
    }
}

/// Admits a location write only once the driver has both waited
/// `min_interval` and moved `min_displacement_m` since the last admitted one.
pub struct LocationThrottle {
    min_interval: Duration,
    min_displacement_m: f64,
    last_admitted: DashMap<Uuid, (GeoPoint, Instant)>,
}

impl LocationThrottle {
    pub fn new(min_interval: Duration, min_displacement_m: f64) -> Self {
        Self {
            min_interval,
            min_displacement_m,
            last_admitted: DashMap::new(),
        }
    }

    pub fn admit(&self, driver_id: Uuid, location: GeoPoint, now: Instant) -> bool {
        match self.last_admitted.entry(driver_id) {
            Entry::Vacant(entry) => {
                entry.insert((location, now));
                true
            }
            Entry::Occupied(mut entry) => {
                let (last_location, last_at) = *entry.get();
                let waited = now.saturating_duration_since(last_at) >= self.min_interval;
                let moved = displacement_m(&last_location, &location) >= self.min_displacement_m;

                if waited && moved {
                    entry.insert((location, now));
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn forget(&self, driver_id: Uuid) {
        self.last_admitted.remove(&driver_id);
    }
}

pub struct PresenceTracker {
    connections: DashMap<Uuid, ConnectionId>,
    throttle: LocationThrottle,
    location_tx: mpsc::Sender<LocationUpdate>,
    store: Arc<dyn Store>,
    metrics: Metrics,
}

impl PresenceTracker {
    pub fn new(
        store: Arc<dyn Store>,
        throttle: LocationThrottle,
        location_queue_size: usize,
        metrics: Metrics,
    ) -> (Self, mpsc::Receiver<LocationUpdate>) {
        let (location_tx, location_rx) = mpsc::channel(location_queue_size.max(1));
        (
            Self {
                connections: DashMap::new(),
                throttle,
                location_tx,
                store,
                metrics,
            },
            location_rx,
        )
    }

    /// Returns the connection this one replaced, if the user was already online.
    pub fn register_connection(
        &self,
        user_id: Uuid,
        connection: ConnectionId,
    ) -> Option<ConnectionId> {
        self.connections.insert(user_id, connection)
    }

    /// Removes the user's connection only if `connection` is still the current one,
    /// so a late disconnect cannot evict a newer session.
    pub fn remove_connection(&self, user_id: Uuid, connection: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(&user_id, |_, current| *current == connection)
            .is_some();
        if removed {
            self.throttle.forget(user_id);
        }
        removed
    }

    pub fn get_connection(&self, user_id: Uuid) -> Option<ConnectionId> {
        self.connections.get(&user_id).map(|entry| *entry.value())
    }

    pub fn target_for(&self, user_id: Uuid) -> Target {
        Target::from(self.get_connection(user_id))
    }

    pub async fn is_busy(&self, driver_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .store
            .busy_drivers(&[driver_id])
            .await?
            .contains(&driver_id))
    }

    /// Never waits on the store: admitted updates are queued for the
    /// location writer and a full queue drops the update.
    pub fn update_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<LocationOutcome, AppError> {
        validate_point(&location)?;

        let outcome = if !self.throttle.admit(driver_id, location, Instant::now()) {
            LocationOutcome::Throttled
        } else {
            match self.location_tx.try_send(LocationUpdate {
                driver_id,
                location,
            }) {
                Ok(()) => {
                    self.metrics.location_queue_depth.inc();
                    LocationOutcome::Queued
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(driver_id = %driver_id, "location queue full; update dropped");
                    LocationOutcome::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(AppError::Internal(
                        "location writer is not running".to_string(),
                    ));
                }
            }
        };

        self.metrics
            .location_updates_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        Ok(outcome)
    }
}

#[derive(Serialize)]
struct DriverLocationPayload {
    driver_id: Uuid,
    coordinates: [f64; 2],
}

pub async fn run_location_writer(
    state: Arc<AppState>,
    mut location_rx: mpsc::Receiver<LocationUpdate>,
) {
    info!("location writer started");

    while let Some(update) = location_rx.recv().await {
        state.metrics.location_queue_depth.dec();

        match state
            .store
            .update_driver_location(update.driver_id, update.location)
            .await
        {
            Ok(()) => {
                debug!(driver_id = %update.driver_id, "driver location persisted");
                state.notifier.emit(
                    EventName::DriverLocationUpdated,
                    &DriverLocationPayload {
                        driver_id: update.driver_id,
                        coordinates: update.location.coordinates(),
                    },
                    Target::ADMINS,
                );
            }
            Err(err) => {
                state
                    .metrics
                    .location_updates_total
                    .with_label_values(&["failed"])
                    .inc();
                warn!(driver_id = %update.driver_id, error = %err, "failed to persist driver location");
            }
        }
    }

    warn!("location writer stopped: queue channel closed");
}
