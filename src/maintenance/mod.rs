use tokio::time::{Duration, sleep};
use tracing::{error, info};

use crate::web::{AppState, auth};

const CLEANUP_INTERVAL_MINUTES: u64 = 15;

/// Runs the expired-session sweep forever on the Tokio runtime.
pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            run_cleanup_cycle(&state).await;
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState) {
    match auth::purge_expired_sessions(state.pool_ref()).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "expired sessions purged"),
        Err(err) => error!(?err, "session cleanup cycle failed"),
    }
}
