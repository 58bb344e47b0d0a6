//! The scheduling state machine: binding pending jobs to flexlets and
//! recording heartbeats and results.
//!
//! Finish and heartbeat predicates condition on both the expected state and
//! the exact task uuid, so a stale caller (a flexlet finishing a task the
//! Maintainer already reclaimed) silently loses instead of clobbering the
//! fresh attempt.

use prost::Message;
use sqlx::Row;
use uuid::Uuid;

use super::{db_err, decode_err, now_ms, MetaStore, MetaStoreError};
use crate::pb::flex::{JobId, JobSpec, TaskId, TaskResult};
use crate::pb::flexlet::TaskRef;

fn ref_task_uuid(task_ref: &TaskRef) -> &str {
    task_ref
        .task_id
        .as_ref()
        .map(|id| id.uuid.as_str())
        .unwrap_or_default()
}

fn ref_job_id(task_ref: &TaskRef) -> i64 {
    task_ref
        .job_id
        .as_ref()
        .map(|id| id.int_id)
        .unwrap_or_default()
}

impl MetaStore {
    /// Atomically binds the highest-priority oldest pending job to the
    /// named flexlet: creates a running task row, flips the job to RUNNING,
    /// and returns the binding plus the decoded spec. Ties break FIFO
    /// within a priority.
    pub async fn take_task(
        &self,
        flexlet_name: &str,
    ) -> Result<(TaskRef, JobSpec), MetaStoreError> {
        let op = "taking a pending task";
        let mut tx = self.pool().begin().await.map_err(db_err(op))?;

        let row = sqlx::query(
            r#"
SELECT id, request
FROM jobs
WHERE state = 'PENDING'
ORDER BY priority DESC, id ASC
LIMIT 1
"#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err(op))?
        .ok_or(MetaStoreError::NoPendingTask)?;

        let job_id: i64 = row.get("id");
        let spec =
            JobSpec::decode(&row.get::<Vec<u8>, _>("request")[..]).map_err(decode_err(op))?;

        let task_uuid = Uuid::new_v4().to_string();
        let now = now_ms();
        sqlx::query(
            "INSERT INTO tasks (uuid, flexlet, state, started, last_update) \
             VALUES (?, ?, 'RUNNING', ?, ?)",
        )
        .bind(&task_uuid)
        .bind(flexlet_name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err(op))?;

        sqlx::query("UPDATE jobs SET state = 'RUNNING', task_uuid = ? WHERE id = ?")
            .bind(&task_uuid)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err(op))?;

        tx.commit().await.map_err(db_err(op))?;

        let task_ref = TaskRef {
            task_id: Some(TaskId { uuid: task_uuid }),
            job_id: Some(JobId { int_id: job_id }),
        };
        Ok((task_ref, spec))
    }

    /// Heartbeat: refreshes the task's `last_update`. A no-op once the task
    /// has finished.
    pub async fn update_task(&self, task_ref: &TaskRef) -> Result<(), MetaStoreError> {
        let op = "updating a running task";
        sqlx::query("UPDATE tasks SET last_update = ? WHERE uuid = ? AND state = 'RUNNING'")
            .bind(now_ms())
            .bind(ref_task_uuid(task_ref))
            .execute(self.pool())
            .await
            .map_err(db_err(op))?;
        Ok(())
    }

    /// Records a task result. The job moves to FINISHED, or back to PENDING
    /// when the flexlet asks for a retry; the task row keeps the encoded
    /// result. Both updates are predicated on the current binding, so a
    /// duplicate or stale finish is a silent no-op.
    pub async fn finish_task(
        &self,
        task_ref: &TaskRef,
        result: &TaskResult,
        need_retry: bool,
    ) -> Result<(), MetaStoreError> {
        let op = "finishing a task";
        let response = result.encode_to_vec();
        let next_state = if need_retry { "PENDING" } else { "FINISHED" };
        let now = now_ms();

        let mut tx = self.pool().begin().await.map_err(db_err(op))?;
        sqlx::query(
            "UPDATE jobs SET state = ? WHERE id = ? AND task_uuid = ? AND state = 'RUNNING'",
        )
        .bind(next_state)
        .bind(ref_job_id(task_ref))
        .bind(ref_task_uuid(task_ref))
        .execute(&mut *tx)
        .await
        .map_err(db_err(op))?;

        sqlx::query(
            "UPDATE tasks SET state = 'FINISHED', response = ?, finished = ?, last_update = ? \
             WHERE uuid = ? AND state = 'RUNNING'",
        )
        .bind(&response)
        .bind(now)
        .bind(now)
        .bind(ref_task_uuid(task_ref))
        .execute(&mut *tx)
        .await
        .map_err(db_err(op))?;

        tx.commit().await.map_err(db_err(op))
    }
}
