//! The staleness sweep: demote silent flexlets, reclaim orphaned work.

use std::time::Duration;

use super::{db_err, now_ms, MetaStore, MetaStoreError};

impl MetaStore {
    /// One sweep over the fleet and the queue:
    ///
    /// 1. Flexlets whose heartbeat is older than `staleness` go OFFLINE.
    /// 2. RUNNING jobs whose bound task stopped heartbeating return to
    ///    PENDING and lose their task binding. The stale task row stays as
    ///    history; its eventual FinishTask no longer matches the binding
    ///    predicate and is ignored.
    pub async fn maintain(&self, staleness: Duration) -> Result<(), MetaStoreError> {
        let op = "running maintenance";
        let cutoff = now_ms() - staleness.as_millis() as i64;

        let mut tx = self.pool().begin().await.map_err(db_err(op))?;
        sqlx::query("UPDATE flexlets SET state = 'OFFLINE' WHERE state = 'ONLINE' AND last_update < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(db_err(op))?;

        sqlx::query(
            r#"
UPDATE jobs SET state = 'PENDING', task_uuid = NULL
WHERE state = 'RUNNING'
  AND task_uuid IN (SELECT uuid FROM tasks WHERE last_update < ?)
"#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(db_err(op))?;

        tx.commit().await.map_err(db_err(op))
    }
}
