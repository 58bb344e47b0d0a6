//! Background sweeper keeping the fleet view and the queue honest.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::metastore::MetaStore;
use crate::settings::MaintenanceConfig;

/// Runs `MetaStore::maintain` once at boot and then on every sweep period
/// until shutdown. Errors are logged and the loop keeps going; a flaky
/// store must not take the sweeper down with it.
pub fn spawn(
    meta: Arc<MetaStore>,
    cfg: MaintenanceConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let staleness = cfg.staleness();
        // The first tick fires immediately, which doubles as the boot sweep.
        let mut interval = tokio::time::interval(cfg.sweep_period());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match meta.maintain(staleness).await {
                        Ok(()) => debug!("maintenance sweep completed"),
                        Err(err) => error!(error = %err, "maintenance sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    })
}
