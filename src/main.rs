use std::sync::Arc;

use grocery_dispatch::api;
use grocery_dispatch::config::Config;
use grocery_dispatch::engine::expiry::run_offer_expiry;
use grocery_dispatch::error::AppError;
use grocery_dispatch::observability::logging;
use grocery_dispatch::presence::run_location_writer;
use grocery_dispatch::state::AppState;
use grocery_dispatch::store::{InMemoryStore, Store};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;
    logging::init(&config);

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let (app_state, location_rx) = AppState::new(config.clone(), store.clone());
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_location_writer(shared_state.clone(), location_rx));
    tokio::spawn(run_offer_expiry(shared_state.clone()));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        radius_km = config.dispatch_radius_km,
        "http server started"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")));

    store.shutdown().await;
    tracing::info!("shutdown complete");

    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
