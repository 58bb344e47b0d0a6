//! Long-poll wrapper over `MetaStore::take_task`.
//!
//! Two jobs: admit exactly one in-flight take-task transaction at a time
//! (many flexlets poll concurrently; the pick-next-pending scan must stay
//! linearizable and fair), and convert "queue empty" into a cooperative
//! wait instead of an immediate error. Callers bound the wait with their
//! own deadline; dropping the future releases the admit slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::metastore::{MetaStore, MetaStoreError};
use crate::pb::flex::JobSpec;
use crate::pb::flexlet::TaskRef;

/// Delay between polls while the queue is empty. Bounds how long a blocked
/// flexlet waits after a submission makes work available.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct WaitQueue {
    meta: Arc<MetaStore>,
    admit: Semaphore,
}

impl WaitQueue {
    pub fn new(meta: Arc<MetaStore>) -> Self {
        Self {
            meta,
            admit: Semaphore::new(1),
        }
    }

    /// Blocks until a pending job can be bound to `flexlet_name`. Loops on
    /// an empty queue; every other store error is returned as-is. The
    /// caller must wrap this in a deadline.
    pub async fn wait_task(
        &self,
        flexlet_name: &str,
    ) -> Result<(TaskRef, JobSpec), MetaStoreError> {
        let _permit = self
            .admit
            .acquire()
            .await
            .expect("admit semaphore closed");

        loop {
            match self.meta.take_task(flexlet_name).await {
                Err(MetaStoreError::NoPendingTask) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                other => return other,
            }
        }
    }
}
