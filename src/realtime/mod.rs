use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::models::user::Role;
use crate::notifier::{ConnectionId, EventFrame, Transport, TransportError};

/// Frame fanned out to every connection of one role.
#[derive(Debug, Clone)]
pub struct RoleFrame {
    pub role: Role,
    pub text: Arc<str>,
}

/// In-process socket broker: one bounded queue per connection plus a
/// broadcast channel for role topics.
pub struct SocketHub {
    connections: DashMap<ConnectionId, mpsc::Sender<String>>,
    topics: broadcast::Sender<RoleFrame>,
    connection_buffer: usize,
}

impl SocketHub {
    pub fn new(connection_buffer: usize, topic_buffer: usize) -> Self {
        let (topics, _unused_rx) = broadcast::channel(topic_buffer.max(1));
        Self {
            connections: DashMap::new(),
            topics,
            connection_buffer: connection_buffer.max(1),
        }
    }

    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.connection_buffer);
        let id = ConnectionId::new();
        self.connections.insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, connection: ConnectionId) {
        self.connections.remove(&connection);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoleFrame> {
        self.topics.subscribe()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Transport for SocketHub {
    fn send_to(&self, connection: ConnectionId, frame: &EventFrame) -> Result<(), TransportError> {
        let text = serde_json::to_string(frame)?;
        let sender = self
            .connections
            .get(&connection)
            .ok_or(TransportError::NotConnected(connection))?;

        sender.try_send(text).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(connection),
            mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected(connection),
        })
    }

    fn publish(&self, role: Role, frame: &EventFrame) -> Result<usize, TransportError> {
        let text: Arc<str> = serde_json::to_string(frame)?.into();
        // No subscribers means nobody is online to hear it.
        Ok(self.topics.send(RoleFrame { role, text }).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SocketHub;
    use crate::models::user::Role;
    use crate::notifier::{ConnectionId, EventFrame, Transport, TransportError};

    fn frame() -> EventFrame {
        EventFrame {
            event: "new-order".to_string(),
            data: json!({ "id": 1 }),
        }
    }

    #[test]
    fn direct_send_reaches_only_that_connection() {
        let hub = SocketHub::new(4, 4);
        let (a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.send_to(a, &frame()).unwrap();

        let text = rx_a.try_recv().unwrap();
        assert!(text.contains("\"event\":\"new-order\""));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn full_queue_reports_backpressure() {
        let hub = SocketHub::new(1, 4);
        let (a, _rx) = hub.register();

        hub.send_to(a, &frame()).unwrap();
        let err = hub.send_to(a, &frame()).unwrap_err();
        assert!(matches!(err, TransportError::Backpressure(_)));
    }

    #[test]
    fn unknown_connection_is_not_connected() {
        let hub = SocketHub::new(4, 4);
        let err = hub.send_to(ConnectionId::new(), &frame()).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let hub = SocketHub::new(4, 4);
        assert_eq!(hub.publish(Role::Admin, &frame()).unwrap(), 0);

        let mut rx = hub.subscribe();
        assert_eq!(hub.publish(Role::Admin, &frame()).unwrap(), 1);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.role, Role::Admin);
    }
}
