use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::state::AppState;

/// Periodically expires broadcasts nobody accepted within the configured TTL.
pub async fn run_offer_expiry(state: Arc<AppState>) {
    if state.config.offer_ttl.is_zero() {
        return;
    }
    if let Err(err) = state.config.validate() {
        error!(error = %err, "offer expiry sweeper not started");
        return;
    }

    info!(
        ttl_secs = state.config.offer_ttl.as_secs(),
        "offer expiry sweeper started"
    );

    let mut ticker = interval(state.config.offer_sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match sweep_stale_offers(&state).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "expired stale offers"),
            Err(AppError::Unavailable) => {
                warn!("offer expiry sweeper stopped: store unavailable");
                return;
            }
            Err(err) => warn!(error = %err, "offer expiry sweep failed"),
        }
    }
}

pub async fn sweep_stale_offers(state: &AppState) -> Result<usize, AppError> {
    let ttl = chrono::Duration::from_std(state.config.offer_ttl)
        .map_err(|err| AppError::Internal(format!("invalid offer ttl: {err}")))?;
    let stale = state.store.stale_broadcasts(Utc::now() - ttl).await?;

    let mut expired = 0;
    for assignment_id in stale {
        match state.arbiter.cancel(assignment_id).await {
            Ok(_) => expired += 1,
            // Accepted or cancelled between the scan and the update.
            Err(AppError::Conflict(_)) => {
                debug!(assignment_id = %assignment_id, "offer settled before expiry");
            }
            Err(err) => {
                warn!(assignment_id = %assignment_id, error = %err, "failed to expire offer");
            }
        }
    }
    Ok(expired)
}
