//! Worker-facing RPC surface: take work, heartbeat it, report results.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::debug;

use super::{blob_status, store_status};
use crate::blobstore::BlobStore;
use crate::metastore::MetaStore;
use crate::paths::{package_path, task_output_path, STDERR_NAME, STDOUT_NAME};
use crate::pb::flex::{FileLocation, JobSpec};
use crate::pb::flexlet::flexlet_service_server::FlexletService;
use crate::pb::flexlet::*;
use crate::waitqueue::WaitQueue;

/// Server-imposed deadline for a long-poll TakeTask; workers retry after it.
const LONG_POLL_DEADLINE: Duration = Duration::from_secs(60);
/// Validity of package download URLs handed to a worker before it starts.
const PRE_TASK_TIME: Duration = Duration::from_secs(60);
/// Extra validity of output upload URLs beyond the job's time limit.
const POST_TASK_TIME: Duration = Duration::from_secs(60);

pub struct FlexletServiceImpl {
    meta: Arc<MetaStore>,
    blob: Arc<dyn BlobStore>,
    queue: WaitQueue,
}

impl FlexletServiceImpl {
    pub fn new(meta: Arc<MetaStore>, blob: Arc<dyn BlobStore>) -> Self {
        let queue = WaitQueue::new(meta.clone());
        Self { meta, blob, queue }
    }

    /// Resolves a job spec into the record a worker can execute: package
    /// references become presigned download URLs, and the task's output
    /// slots become presigned upload URLs that outlive the run.
    async fn materialize(
        &self,
        task_ref: &TaskRef,
        job_spec: &JobSpec,
    ) -> Result<TaskSpec, Status> {
        let mut packages = Vec::new();
        if let Some(inputs) = &job_spec.inputs {
            for pkg in &inputs.packages {
                let hash = pkg
                    .id
                    .as_ref()
                    .map(|id| id.hash.as_str())
                    .unwrap_or_default();
                let path = package_path(hash);
                let url = self
                    .blob
                    .presign_get(&path, PRE_TASK_TIME)
                    .await
                    .map_err(blob_status)?;
                packages.push(TaskPackage {
                    location: Some(FileLocation {
                        canonical_url: self.blob.canonical_url(&path),
                        presigned_url: url,
                    }),
                    install_dir: pkg.install_dir.clone(),
                });
            }
        }

        let time_limit = job_spec
            .limits
            .as_ref()
            .and_then(|l| l.time.clone())
            .and_then(|d| Duration::try_from(d).ok())
            .unwrap_or_default();
        let write_limit = time_limit + PRE_TASK_TIME + POST_TASK_TIME;

        let task_uuid = task_ref
            .task_id
            .as_ref()
            .map(|id| id.uuid.as_str())
            .unwrap_or_default();
        let stdout_path = task_output_path(task_uuid, STDOUT_NAME);
        let stdout_url = self
            .blob
            .presign_put(&stdout_path, write_limit)
            .await
            .map_err(blob_status)?;
        let stderr_path = task_output_path(task_uuid, STDERR_NAME);
        let stderr_url = self
            .blob
            .presign_put(&stderr_path, write_limit)
            .await
            .map_err(blob_status)?;

        Ok(TaskSpec {
            command: job_spec.command.clone(),
            inputs: Some(TaskInputs { packages }),
            outputs: Some(TaskOutputs {
                stdout: Some(FileLocation {
                    canonical_url: self.blob.canonical_url(&stdout_path),
                    presigned_url: stdout_url,
                }),
                stderr: Some(FileLocation {
                    canonical_url: self.blob.canonical_url(&stderr_path),
                    presigned_url: stderr_url,
                }),
            }),
            limits: job_spec.limits.clone(),
        })
    }
}

#[tonic::async_trait]
impl FlexletService for FlexletServiceImpl {
    async fn take_task(
        &self,
        request: Request<TakeTaskRequest>,
    ) -> Result<Response<TakeTaskResponse>, Status> {
        let r = request.into_inner();

        let taken = if r.wait {
            match tokio::time::timeout(
                LONG_POLL_DEADLINE,
                self.queue.wait_task(&r.flexlet_name),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => return Err(Status::deadline_exceeded("no task within deadline")),
            }
        } else {
            self.meta.take_task(&r.flexlet_name).await
        };
        let (task_ref, job_spec) = taken.map_err(store_status)?;

        debug!(
            flexlet = %r.flexlet_name,
            job_id = task_ref.job_id.as_ref().map(|id| id.int_id).unwrap_or_default(),
            "task taken"
        );

        let spec = self.materialize(&task_ref, &job_spec).await?;
        Ok(Response::new(TakeTaskResponse {
            task: Some(Task {
                task_ref: Some(task_ref),
                spec: Some(spec),
            }),
        }))
    }

    async fn update_task(
        &self,
        request: Request<UpdateTaskRequest>,
    ) -> Result<Response<UpdateTaskResponse>, Status> {
        let r = request.into_inner();
        let task_ref = r.task_ref.unwrap_or_default();
        self.meta
            .update_task(&task_ref)
            .await
            .map_err(store_status)?;
        Ok(Response::new(UpdateTaskResponse {}))
    }

    async fn finish_task(
        &self,
        request: Request<FinishTaskRequest>,
    ) -> Result<Response<FinishTaskResponse>, Status> {
        let r = request.into_inner();
        let task_ref = r.task_ref.unwrap_or_default();
        let result = r.result.unwrap_or_default();
        self.meta
            .finish_task(&task_ref, &result, r.need_retry)
            .await
            .map_err(store_status)?;
        Ok(Response::new(FinishTaskResponse {}))
    }

    async fn update_flexlet(
        &self,
        request: Request<UpdateFlexletRequest>,
    ) -> Result<Response<UpdateFlexletResponse>, Status> {
        let r = request.into_inner();
        let status = r.status.unwrap_or_default();
        self.meta
            .update_flexlet(&status)
            .await
            .map_err(store_status)?;
        Ok(Response::new(UpdateFlexletResponse {}))
    }
}
