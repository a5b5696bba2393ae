use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CoordinatorHandle;
use crate::config::ConfigStore;
use crate::error::CoordinatorError;

/// Poll the player every `check_interval_seconds`. The interval is re-read each
/// round so a config reload takes effect without a restart.
pub fn spawn_liveness_monitor(handle: CoordinatorHandle, config: ConfigStore) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Liveness monitor started");
        loop {
            let interval = config.snapshot().await.check_interval_seconds.max(1);
            tokio::time::sleep(Duration::from_secs(interval)).await;

            match handle.check_liveness().await {
                Ok(status) => debug!("Liveness check: {:?}", status.state),
                Err(CoordinatorError::Closed) => {
                    info!("Coordinator gone, liveness monitor exiting");
                    break;
                }
                // advance failures already land in status
                Err(e) => warn!("Liveness check failed: {}", e),
            }
        }
    })
}
