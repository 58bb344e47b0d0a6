//! Flexlet fleet rows and capacity aggregation.

use std::collections::HashMap;

use prost::Message;
use sqlx::Row;

use super::states::{format_flexlet_state, parse_flexlet_state};
use super::{db_err, decode_err, now_ms, MetaStore, MetaStoreError};
use crate::pb::flex::{
    Flexlet, FlexletId, FlexletSpec, FlexletStats, FlexletStatus, Job, JobId, JobSpec, JobStats,
    Stats,
};

impl MetaStore {
    /// Upserts a flexlet row from its heartbeat, refreshing `last_update`.
    pub async fn update_flexlet(&self, status: &FlexletStatus) -> Result<(), MetaStoreError> {
        let op = "updating a flexlet";
        let flexlet = status.flexlet.clone().unwrap_or_default();
        let name = flexlet.id.as_ref().map(|id| id.name.clone()).unwrap_or_default();
        let spec = flexlet.spec.unwrap_or_default();

        sqlx::query(
            r#"
INSERT INTO flexlets (name, state, cores, data, last_update) VALUES (?, ?, ?, ?, ?)
ON CONFLICT (name) DO UPDATE SET
    state = excluded.state,
    cores = excluded.cores,
    data = excluded.data,
    last_update = excluded.last_update
"#,
        )
        .bind(&name)
        .bind(format_flexlet_state(status.state()))
        .bind(spec.cores)
        .bind(spec.encode_to_vec())
        .bind(now_ms())
        .execute(self.pool())
        .await
        .map_err(db_err(op))?;
        Ok(())
    }

    /// Lists registered flexlets by name, each with the jobs currently
    /// running on it. Running jobs bound to an unregistered flexlet name are
    /// skipped.
    pub async fn list_flexlets(&self) -> Result<Vec<FlexletStatus>, MetaStoreError> {
        let op = "listing flexlets";

        let rows = sqlx::query("SELECT name, state, cores, data FROM flexlets ORDER BY name ASC")
            .fetch_all(self.pool())
            .await
            .map_err(db_err(op))?;

        let mut statuses: Vec<FlexletStatus> = Vec::with_capacity(rows.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let state = parse_flexlet_state(row.get::<String, _>("state").as_str())?;
            let mut spec =
                FlexletSpec::decode(&row.get::<Vec<u8>, _>("data")[..]).map_err(decode_err(op))?;
            spec.cores = row.get("cores");
            index.insert(name.clone(), statuses.len());
            statuses.push(FlexletStatus {
                flexlet: Some(Flexlet {
                    id: Some(FlexletId { name }),
                    spec: Some(spec),
                }),
                state: state as i32,
                current_jobs: Vec::new(),
            });
        }

        let running = sqlx::query(
            r#"
SELECT t.flexlet, j.id, j.request
FROM jobs j
    INNER JOIN tasks t ON (j.task_uuid = t.uuid)
WHERE j.state = 'RUNNING'
"#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err(op))?;

        for row in running {
            let flexlet: String = row.get("flexlet");
            let Some(&at) = index.get(&flexlet) else {
                continue;
            };
            let spec =
                JobSpec::decode(&row.get::<Vec<u8>, _>("request")[..]).map_err(decode_err(op))?;
            statuses[at].current_jobs.push(Job {
                id: Some(JobId {
                    int_id: row.get("id"),
                }),
                spec: Some(spec),
            });
        }
        Ok(statuses)
    }

    /// Aggregate queue depth and fleet capacity. Flexlets advertising
    /// `cores = -1` (ephemeral capacity) are left out of the core counts.
    pub async fn get_stats(&self) -> Result<Stats, MetaStoreError> {
        let op = "reading stats";

        let pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = 'PENDING'")
                .fetch_one(self.pool())
                .await
                .map_err(db_err(op))?;
        let running: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = 'RUNNING'")
                .fetch_one(self.pool())
                .await
                .map_err(db_err(op))?;

        let online: i32 =
            sqlx::query_scalar("SELECT COUNT(*) FROM flexlets WHERE state = 'ONLINE'")
                .fetch_one(self.pool())
                .await
                .map_err(db_err(op))?;
        let offline: i32 =
            sqlx::query_scalar("SELECT COUNT(*) FROM flexlets WHERE state = 'OFFLINE'")
                .fetch_one(self.pool())
                .await
                .map_err(db_err(op))?;

        let busy_cores: i32 = sqlx::query_scalar(
            r#"
SELECT COUNT(*)
FROM jobs j
    INNER JOIN tasks t ON (j.task_uuid = t.uuid)
    INNER JOIN flexlets f ON (t.flexlet = f.name)
WHERE j.state = 'RUNNING' AND f.cores >= 0
"#,
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err(op))?;

        let online_cores: i32 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cores), 0) FROM flexlets WHERE state = 'ONLINE' AND cores >= 0",
        )
        .fetch_one(self.pool())
        .await
        .map_err(db_err(op))?;

        Ok(Stats {
            job: Some(JobStats {
                pending_jobs: pending,
                running_jobs: running,
            }),
            flexlet: Some(FlexletStats {
                online_flexlets: online,
                offline_flexlets: offline,
                busy_cores,
                idle_cores: online_cores - busy_cores,
            }),
        })
    }
}
