use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::arbiter::AssignmentArbiter;
use crate::engine::dispatch::DispatchEngine;
use crate::engine::lifecycle::OrderLifecycle;
use crate::notifier::EventNotifier;
use crate::observability::metrics::Metrics;
use crate::presence::{LocationThrottle, LocationUpdate, PresenceTracker};
use crate::realtime::SocketHub;
use crate::store::Store;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub hub: Arc<SocketHub>,
    pub presence: Arc<PresenceTracker>,
    pub notifier: Arc<EventNotifier>,
    pub dispatch: Arc<DispatchEngine>,
    pub arbiter: Arc<AssignmentArbiter>,
    pub lifecycle: OrderLifecycle,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> (Self, mpsc::Receiver<LocationUpdate>) {
        let metrics = Metrics::new();

        let hub = Arc::new(SocketHub::new(
            config.connection_buffer_size,
            config.event_buffer_size,
        ));
        let notifier = Arc::new(EventNotifier::new(hub.clone(), metrics.clone()));

        let (presence, location_rx) = PresenceTracker::new(
            store.clone(),
            LocationThrottle::new(
                config.location_min_interval,
                config.location_min_displacement_m,
            ),
            config.location_queue_size,
            metrics.clone(),
        );
        let presence = Arc::new(presence);

        let dispatch = Arc::new(DispatchEngine::new(
            store.clone(),
            presence.clone(),
            notifier.clone(),
            config.dispatch_radius_km,
            metrics.clone(),
        ));
        let arbiter = Arc::new(AssignmentArbiter::new(
            store.clone(),
            presence.clone(),
            notifier.clone(),
            metrics.clone(),
        ));
        let lifecycle = OrderLifecycle::new(
            store.clone(),
            dispatch.clone(),
            arbiter.clone(),
            presence.clone(),
            notifier.clone(),
            metrics.clone(),
        );

        (
            Self {
                config,
                store,
                hub,
                presence,
                notifier,
                dispatch,
                arbiter,
                lifecycle,
                metrics,
            },
            location_rx,
        )
    }
}
