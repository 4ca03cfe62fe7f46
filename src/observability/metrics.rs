use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub accept_total: IntCounterVec,
    pub status_transitions_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub location_updates_total: IntCounterVec,
    pub location_queue_depth: IntGauge,
    pub live_connections: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of candidate discovery and broadcast in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let accept_total = IntCounterVec::new(
            Opts::new("accept_total", "Assignment accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accept_total metric");

        let status_transitions_total = IntCounterVec::new(
            Opts::new("status_transitions_total", "Order status transitions by target status"),
            &["to"],
        )
        .expect("valid status_transitions_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Realtime events by name and delivery outcome"),
            &["event", "outcome"],
        )
        .expect("valid notifications_total metric");

        let location_updates_total = IntCounterVec::new(
            Opts::new("location_updates_total", "Driver location updates by outcome"),
            &["outcome"],
        )
        .expect("valid location_updates_total metric");

        let location_queue_depth = IntGauge::new(
            "location_queue_depth",
            "Location writes waiting to be persisted",
        )
        .expect("valid location_queue_depth metric");

        let live_connections =
            IntGauge::new("live_connections", "Currently open realtime connections")
                .expect("valid live_connections metric");

        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(accept_total.clone()))
            .expect("register accept_total");
        registry
            .register(Box::new(status_transitions_total.clone()))
            .expect("register status_transitions_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(location_queue_depth.clone()))
            .expect("register location_queue_depth");
        registry
            .register(Box::new(live_connections.clone()))
            .expect("register live_connections");

        Self {
            registry,
            dispatch_total,
            dispatch_latency_seconds,
            accept_total,
            status_transitions_total,
            notifications_total,
            location_updates_total,
            location_queue_depth,
            live_connections,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
