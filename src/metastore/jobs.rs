//! Job rows: submission, reads, filtered listing, and the label index.

use prost::Message;
use sqlx::Row;

use super::states::{format_job_state, parse_job_state};
use super::{db_err, decode_err, now_ms, MetaStore, MetaStoreError};
use crate::pb::flex::{
    FlexletId, Job, JobAnnotations, JobId, JobSpec, JobState, JobStatus, TaskId, TaskResult,
};

/// Composed view of one job row joined with its bound task, if any.
fn compose_status(
    op: &'static str,
    id: i64,
    state: &str,
    task_uuid: Option<String>,
    flexlet: Option<String>,
    request: &[u8],
    response: Option<Vec<u8>>,
) -> Result<JobStatus, MetaStoreError> {
    let spec = JobSpec::decode(request).map_err(decode_err(op))?;
    let result = match response {
        Some(bytes) => TaskResult::decode(&bytes[..]).map_err(decode_err(op))?,
        None => TaskResult::default(),
    };
    let state = parse_job_state(state)?;
    Ok(JobStatus {
        job: Some(Job {
            id: Some(JobId { int_id: id }),
            spec: Some(spec),
        }),
        state: state as i32,
        task_id: task_uuid.map(|uuid| TaskId { uuid }),
        flexlet_id: flexlet.map(|name| FlexletId { name }),
        result: Some(result),
    })
}

/// Computes the effective label change: additions already present and
/// deletions not present are pruned, duplicates collapse to their first
/// occurrence. Surviving old labels keep their order; effective additions
/// are appended in request order.
fn label_delta(
    current: &[String],
    adds: &[String],
    dels: &[String],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut effective_adds: Vec<String> = Vec::new();
    for label in adds {
        if !current.contains(label) && !effective_adds.contains(label) {
            effective_adds.push(label.clone());
        }
    }
    let mut effective_dels: Vec<String> = Vec::new();
    for label in dels {
        if current.contains(label) && !effective_dels.contains(label) {
            effective_dels.push(label.clone());
        }
    }
    let mut next: Vec<String> = current
        .iter()
        .filter(|l| !effective_dels.contains(l))
        .cloned()
        .collect();
    next.extend(effective_adds.iter().cloned());
    (effective_adds, effective_dels, next)
}

impl MetaStore {
    /// Inserts a pending job and its label-index rows; returns the new id.
    pub async fn insert_job(&self, spec: &JobSpec) -> Result<i64, MetaStoreError> {
        let op = "inserting a job";
        let priority = spec
            .constraints
            .as_ref()
            .map(|c| c.priority)
            .unwrap_or_default();
        let request = spec.encode_to_vec();

        let mut tx = self.pool().begin().await.map_err(db_err(op))?;
        let result = sqlx::query(
            "INSERT INTO jobs (priority, state, request, created) VALUES (?, 'PENDING', ?, ?)",
        )
        .bind(priority)
        .bind(&request)
        .bind(now_ms())
        .execute(&mut *tx)
        .await
        .map_err(db_err(op))?;
        let id = result.last_insert_rowid();

        if let Some(annotations) = &spec.annotations {
            for label in &annotations.labels {
                sqlx::query("INSERT OR IGNORE INTO labels (job_id, label) VALUES (?, ?)")
                    .bind(id)
                    .bind(label)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err(op))?;
            }
        }
        tx.commit().await.map_err(db_err(op))?;
        Ok(id)
    }

    /// Reads one job joined with its bound task.
    pub async fn get_job(&self, id: i64) -> Result<JobStatus, MetaStoreError> {
        let op = "reading a job";
        let row = sqlx::query(
            r#"
SELECT j.state, j.task_uuid, t.flexlet, j.request, t.response
FROM jobs j
    LEFT OUTER JOIN tasks t ON (j.task_uuid = t.uuid)
WHERE j.id = ?
"#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err(op))?
        .ok_or(MetaStoreError::JobNotFound(id))?;

        compose_status(
            op,
            id,
            row.get::<String, _>("state").as_str(),
            row.get("task_uuid"),
            row.get("flexlet"),
            &row.get::<Vec<u8>, _>("request"),
            row.get("response"),
        )
    }

    /// Lists jobs newest-first, starting below `before_id`, optionally
    /// filtered by state and label. `before_id <= 0` means "from the
    /// newest"; passing `i64::MAX` is equivalent.
    pub async fn list_jobs(
        &self,
        limit: i64,
        before_id: i64,
        state: JobState,
        label: Option<&str>,
    ) -> Result<Vec<JobStatus>, MetaStoreError> {
        let op = "listing jobs";
        let before = if before_id <= 0 { i64::MAX } else { before_id };
        let any_state = state == JobState::Unspecified;

        let rows = match label {
            None => {
                sqlx::query(
                    r#"
SELECT j.id, j.state, j.task_uuid, t.flexlet, j.request, t.response
FROM jobs j
    LEFT OUTER JOIN tasks t ON (j.task_uuid = t.uuid)
WHERE j.id < ? AND (? OR j.state = ?)
ORDER BY j.id DESC
LIMIT ?
"#,
                )
                .bind(before)
                .bind(any_state)
                .bind(format_job_state(state))
                .bind(limit)
                .fetch_all(self.pool())
                .await
            }
            Some(label) => {
                sqlx::query(
                    r#"
SELECT j.id, j.state, j.task_uuid, t.flexlet, j.request, t.response
FROM jobs j
    INNER JOIN labels l ON (l.job_id = j.id AND l.label = ?)
    LEFT OUTER JOIN tasks t ON (j.task_uuid = t.uuid)
WHERE j.id < ? AND (? OR j.state = ?)
ORDER BY j.id DESC
LIMIT ?
"#,
                )
                .bind(label)
                .bind(before)
                .bind(any_state)
                .bind(format_job_state(state))
                .bind(limit)
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(db_err(op))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(compose_status(
                op,
                row.get("id"),
                row.get::<String, _>("state").as_str(),
                row.get("task_uuid"),
                row.get("flexlet"),
                &row.get::<Vec<u8>, _>("request"),
                row.get("response"),
            )?);
        }
        Ok(jobs)
    }

    /// Applies a label delta to a job's spec and keeps the label index in
    /// sync with it. Adding a present label or removing an absent one is a
    /// no-op.
    pub async fn update_job_labels(
        &self,
        id: i64,
        adds: &[String],
        dels: &[String],
    ) -> Result<(), MetaStoreError> {
        let op = "updating job labels";
        let mut tx = self.pool().begin().await.map_err(db_err(op))?;

        let row = sqlx::query("SELECT request FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err(op))?
            .ok_or(MetaStoreError::JobNotFound(id))?;
        let mut spec =
            JobSpec::decode(&row.get::<Vec<u8>, _>("request")[..]).map_err(decode_err(op))?;

        let current = spec
            .annotations
            .as_ref()
            .map(|a| a.labels.clone())
            .unwrap_or_default();
        let (effective_adds, effective_dels, next) = label_delta(&current, adds, dels);
        if effective_adds.is_empty() && effective_dels.is_empty() {
            return Ok(());
        }

        spec.annotations = Some(JobAnnotations { labels: next });
        sqlx::query("UPDATE jobs SET request = ? WHERE id = ?")
            .bind(spec.encode_to_vec())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err(op))?;

        for label in &effective_dels {
            sqlx::query("DELETE FROM labels WHERE job_id = ? AND label = ?")
                .bind(id)
                .bind(label)
                .execute(&mut *tx)
                .await
                .map_err(db_err(op))?;
        }
        for label in &effective_adds {
            sqlx::query("INSERT OR IGNORE INTO labels (job_id, label) VALUES (?, ?)")
                .bind(id)
                .bind(label)
                .execute(&mut *tx)
                .await
                .map_err(db_err(op))?;
        }
        tx.commit().await.map_err(db_err(op))
    }
}
