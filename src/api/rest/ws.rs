use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::api::rest::parse_id;
use crate::error::AppError;
use crate::models::user::{GeoPoint, User};
use crate::notifier::EventFrame;
use crate::state::AppState;

const UPDATE_LOCATION: &str = "update-location";

#[derive(Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
struct LocationData {
    coordinates: [f64; 2],
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
) -> Result<impl IntoResponse, AppError> {
    let raw = params
        .user_id
        .ok_or_else(|| AppError::Unauthorized("missing user_id".to_string()))?;
    let user_id = parse_id("user", &raw)?;
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized(format!("unknown user {user_id}")))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: User) {
    let (mut sender, mut receiver) = socket.split();

    let (connection, mut direct_rx) = state.hub.register();
    let mut topic_stream = BroadcastStream::new(state.hub.subscribe());
    if state.presence.register_connection(user.id, connection).is_some() {
        debug!(user_id = %user.id, "replaced an existing connection");
    }
    state.metrics.live_connections.inc();

    info!(user_id = %user.id, role = %user.role, connection = %connection, "realtime client connected");

    let role = user.role;
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(text) = direct_rx.recv() => text,
                Some(item) = topic_stream.next() => match item {
                    Ok(frame) if frame.role == role => frame.text.to_string(),
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "realtime client lagging; topic events skipped");
                        continue;
                    }
                },
                else => break,
            };

            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_inbound(&recv_state, &recv_user, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(connection);
    state.presence.remove_connection(user.id, connection);
    state.metrics.live_connections.dec();

    info!(user_id = %user.id, connection = %connection, "realtime client disconnected");
}

fn handle_inbound(state: &AppState, user: &User, text: &str) {
    let frame: EventFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(user_id = %user.id, error = %err, "ignoring malformed realtime frame");
            return;
        }
    };

    if frame.event != UPDATE_LOCATION {
        debug!(user_id = %user.id, event = %frame.event, "ignoring unknown realtime event");
        return;
    }
    if !user.is_driver() {
        debug!(user_id = %user.id, "location update from non-driver ignored");
        return;
    }

    let data: LocationData = match serde_json::from_value(frame.data) {
        Ok(data) => data,
        Err(err) => {
            debug!(user_id = %user.id, error = %err, "ignoring malformed location update");
            return;
        }
    };

    if let Err(err) = state
        .presence
        .update_location(user.id, GeoPoint::from_coordinates(data.coordinates))
    {
        debug!(user_id = %user.id, error = %err, "location update rejected");
    }
}
