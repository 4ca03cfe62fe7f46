//! Best-effort outbound events.
//!
//! Events are emitted only after the state change they describe has been
//! committed. Delivery is fire-and-forget: failures are logged and counted,
//! never retried, and never surface to the request that triggered them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::user::Role;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    NewOrder,
    NewAssignmentOffer,
    AssignmentAccepted,
    AssignmentWithdrawn,
    OrderStatusChanged,
    DriverLocationUpdated,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::NewOrder => "new-order",
            EventName::NewAssignmentOffer => "new-assignment-offer",
            EventName::AssignmentAccepted => "assignment-accepted",
            EventName::AssignmentWithdrawn => "assignment-withdrawn",
            EventName::OrderStatusChanged => "order-status-changed",
            EventName::DriverLocationUpdated => "driver-location-updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Connection(ConnectionId),
    /// Every live connection whose user holds this role.
    Role(Role),
    /// Recipient is offline; the event is dropped.
    None,
}

impl Target {
    pub const ADMINS: Target = Target::Role(Role::Admin);
}

impl From<Option<ConnectionId>> for Target {
    fn from(connection: Option<ConnectionId>) -> Self {
        connection.map_or(Target::None, Target::Connection)
    }
}

/// Wire shape of every realtime message, inbound and outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is not open")]
    NotConnected(ConnectionId),

    #[error("connection {0} is not draining its queue")]
    Backpressure(ConnectionId),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Socket broker, pub/sub bus, or anything else that can push a frame.
pub trait Transport: Send + Sync {
    fn send_to(&self, connection: ConnectionId, frame: &EventFrame) -> Result<(), TransportError>;

    /// Returns the number of subscribers the frame was handed to.
    fn publish(&self, role: Role, frame: &EventFrame) -> Result<usize, TransportError>;
}

pub struct EventNotifier {
    transport: Arc<dyn Transport>,
    metrics: Metrics,
}

impl EventNotifier {
    pub fn new(transport: Arc<dyn Transport>, metrics: Metrics) -> Self {
        Self { transport, metrics }
    }

    /// Returns whether the transport accepted the event.
    pub fn emit<T: Serialize>(&self, name: EventName, payload: &T, target: Target) -> bool {
        let outcome = self.try_emit(name, payload, target);
        self.metrics
            .notifications_total
            .with_label_values(&[name.as_str(), outcome])
            .inc();
        outcome == "delivered"
    }

    fn try_emit<T: Serialize>(&self, name: EventName, payload: &T, target: Target) -> &'static str {
        if target == Target::None {
            debug!(event = name.as_str(), "recipient offline; event dropped");
            return "dropped";
        }

        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(err) => {
                warn!(event = name.as_str(), error = %err, "failed to serialize event payload");
                return "failed";
            }
        };
        let frame = EventFrame {
            event: name.as_str().to_string(),
            data,
        };

        let result = match target {
            Target::Connection(connection) => self.transport.send_to(connection, &frame),
            Target::Role(role) => self.transport.publish(role, &frame).map(|_| ()),
            Target::None => return "dropped",
        };

        match result {
            Ok(()) => "delivered",
            Err(err) => {
                warn!(event = name.as_str(), error = %err, "event delivery failed");
                "failed"
            }
        }
    }
}
