//! Shared fixtures for store-level tests.

use flexhub::metastore::MetaStore;
use flexhub::pb::flex::*;

/// Fresh in-memory store with the schema applied.
pub async fn open_store() -> MetaStore {
    let meta = MetaStore::connect("sqlite::memory:")
        .await
        .expect("opening in-memory store");
    meta.init_tables().await.expect("initializing tables");
    meta
}

/// Minimal job spec with the fields the scheduler cares about.
pub fn job_spec(args: &[&str], priority: i32, labels: &[&str]) -> JobSpec {
    JobSpec {
        command: Some(JobCommand {
            args: args.iter().map(|s| s.to_string()).collect(),
        }),
        inputs: Some(JobInputs::default()),
        limits: Some(JobLimits {
            time: Some(prost_types::Duration {
                seconds: 60,
                nanos: 0,
            }),
        }),
        constraints: Some(JobConstraints { priority }),
        annotations: Some(JobAnnotations {
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

pub fn flexlet_status(name: &str, state: FlexletState, cores: i32) -> FlexletStatus {
    FlexletStatus {
        flexlet: Some(Flexlet {
            id: Some(FlexletId {
                name: name.to_string(),
            }),
            spec: Some(FlexletSpec { cores }),
        }),
        state: state as i32,
        current_jobs: Vec::new(),
    }
}

/// Backdates a task heartbeat so staleness-driven paths can run without
/// waiting out the real threshold.
pub async fn backdate_task(meta: &MetaStore, task_uuid: &str, by_ms: i64) {
    sqlx::query("UPDATE tasks SET last_update = last_update - ? WHERE uuid = ?")
        .bind(by_ms)
        .bind(task_uuid)
        .execute(meta.pool())
        .await
        .expect("backdating task heartbeat");
}

/// Backdates a flexlet heartbeat.
pub async fn backdate_flexlet(meta: &MetaStore, name: &str, by_ms: i64) {
    sqlx::query("UPDATE flexlets SET last_update = last_update - ? WHERE name = ?")
        .bind(by_ms)
        .bind(name)
        .execute(meta.pool())
        .await
        .expect("backdating flexlet heartbeat");
}
