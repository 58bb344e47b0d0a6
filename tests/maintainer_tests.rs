
use std::time::Duration;

use flexhub::pb::flex::*;
use flexhub::pb::flexlet::*;
use flexhub::settings::AppConfig;
use grpc_integration_helpers::{
    flex_client, flexlet_client, shutdown_hub, start_hub_with_config,
};

fn fast_sweep_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.maintenance.sweep_period_secs = 1;
    cfg.maintenance.staleness_secs = 1;
    cfg
}

async fn wait_for_state(
    client: &mut flex_service_client::FlexServiceClient<tonic::transport::Channel>,
    job_id: i64,
    want: JobState,
    deadline: Duration,
) -> anyhow::Result<JobStatus> {
    let started = std::time::Instant::now();
    loop {
        let status = client
            .get_job(GetJobRequest {
                id: Some(JobId { int_id: job_id }),
            })
            .await?
            .into_inner()
            .job
            .unwrap();
        if status.state() == want {
            return Ok(status);
        }
        if started.elapsed() > deadline {
            anyhow::bail!(
                "job {job_id} never reached {want:?}, still {:?}",
                status.state()
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn crashed_worker_job_is_requeued_by_sweeper() -> anyhow::Result<()> {
    let hub = start_hub_with_config(fast_sweep_config(), false).await?;
    let mut client = flex_client(&hub).await?;
    let mut worker = flexlet_client(&hub).await?;

    let job_id = client
        .submit_job(SubmitJobRequest {
            spec: Some(JobSpec {
                command: Some(JobCommand {
                    args: vec!["crashy".to_string()],
                }),
                ..Default::default()
            }),
        })
        .await?
        .into_inner()
        .id
        .unwrap()
        .int_id;

    // Take the task and never heartbeat again, as a crashed worker would.
    let task_ref = worker
        .take_task(TakeTaskRequest {
            flexlet_name: "X".to_string(),
            wait: false,
        })
        .await?
        .into_inner()
        .task
        .unwrap()
        .task_ref
        .unwrap();

    let status = wait_for_state(
        &mut client,
        job_id,
        JobState::Pending,
        Duration::from_secs(10),
    )
    .await?;
    assert!(status.task_id.is_none());

    // The crashed worker's late finish is ignored.
    worker
        .finish_task(FinishTaskRequest {
            task_ref: Some(task_ref),
            result: Some(TaskResult {
                exit_code: 0,
                message: "too late".to_string(),
                time: None,
            }),
            need_retry: false,
        })
        .await?;
    let status = client
        .get_job(GetJobRequest {
            id: Some(JobId { int_id: job_id }),
        })
        .await?
        .into_inner()
        .job
        .unwrap();
    assert_eq!(status.state(), JobState::Pending);

    // The job is available again for another worker.
    let retaken = worker
        .take_task(TakeTaskRequest {
            flexlet_name: "Y".to_string(),
            wait: false,
        })
        .await?
        .into_inner()
        .task
        .unwrap()
        .task_ref
        .unwrap();
    assert_eq!(retaken.job_id.unwrap().int_id, job_id);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_flexlet_goes_offline_in_background() -> anyhow::Result<()> {
    let hub = start_hub_with_config(fast_sweep_config(), false).await?;
    let mut client = flex_client(&hub).await?;
    let mut worker = flexlet_client(&hub).await?;

    worker
        .update_flexlet(UpdateFlexletRequest {
            status: Some(FlexletStatus {
                flexlet: Some(Flexlet {
                    id: Some(FlexletId {
                        name: "quiet".to_string(),
                    }),
                    spec: Some(FlexletSpec { cores: 2 }),
                }),
                state: FlexletState::Online as i32,
                current_jobs: Vec::new(),
            }),
        })
        .await?;

    let started = std::time::Instant::now();
    loop {
        let flexlets = client
            .list_flexlets(ListFlexletsRequest {})
            .await?
            .into_inner()
            .flexlets;
        if flexlets[0].state() == FlexletState::Offline {
            break;
        }
        if started.elapsed() > Duration::from_secs(10) {
            anyhow::bail!("flexlet never demoted to OFFLINE");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shutdown_hub(hub).await
}
