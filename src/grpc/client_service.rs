//! Client-facing RPC surface: job submission and inspection, package
//! upload, tags, fleet views, stats.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use super::{blob_status, store_status};
use crate::blobstore::BlobStore;
use crate::hashutil::{is_std_hash, TeeHasher};
use crate::metastore::MetaStore;
use crate::paths::{package_path, task_output_path, STDERR_NAME, STDOUT_NAME};
use crate::pb::flex::flex_service_server::FlexService;
use crate::pb::flex::get_job_output_request::JobOutputType;
use crate::pb::flex::insert_package_request;
use crate::pb::flex::*;

/// Applied when a submitted job does not set a time limit.
const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);
/// Validity of presigned job-output download URLs.
const OUTPUT_URL_TIME: Duration = Duration::from_secs(60);

pub struct FlexServiceImpl {
    meta: Arc<MetaStore>,
    blob: Arc<dyn BlobStore>,
}

impl FlexServiceImpl {
    pub fn new(meta: Arc<MetaStore>, blob: Arc<dyn BlobStore>) -> Self {
        Self { meta, blob }
    }

    /// Resolves a tag reference to its hash and validates the hash shape.
    async fn resolve_package_id(&self, id: &mut PackageId) -> Result<(), Status> {
        if !id.tag.is_empty() {
            id.hash = self.meta.lookup_tag(&id.tag).await.map_err(store_status)?;
        }
        if !is_std_hash(&id.hash) {
            return Err(Status::invalid_argument(format!(
                "invalid package hash {:?}",
                id.hash
            )));
        }
        Ok(())
    }
}

/// Fills in the sub-records a sparse client request may omit, and defaults
/// the time limit so every task gets a bounded output-upload window.
fn normalize_spec(spec: &mut JobSpec) {
    spec.command.get_or_insert_with(JobCommand::default);
    spec.inputs.get_or_insert_with(JobInputs::default);
    spec.constraints.get_or_insert_with(JobConstraints::default);
    spec.annotations.get_or_insert_with(JobAnnotations::default);
    let limits = spec.limits.get_or_insert_with(JobLimits::default);
    if limits.time.is_none() {
        limits.time = Some(prost_types::Duration {
            seconds: DEFAULT_TIME_LIMIT.as_secs() as i64,
            nanos: 0,
        });
    }
}

#[tonic::async_trait]
impl FlexService for FlexServiceImpl {
    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let r = request.into_inner();
        let mut spec = r.spec.unwrap_or_default();
        normalize_spec(&mut spec);

        if let Some(inputs) = spec.inputs.as_mut() {
            for pkg in &mut inputs.packages {
                let id = pkg
                    .id
                    .as_mut()
                    .ok_or_else(|| Status::invalid_argument("package reference without id"))?;
                self.resolve_package_id(id).await?;
            }
        }

        let id = self.meta.insert_job(&spec).await.map_err(store_status)?;
        info!(job_id = id, "job submitted");
        Ok(Response::new(SubmitJobResponse {
            id: Some(JobId { int_id: id }),
        }))
    }

    async fn cancel_job(
        &self,
        _request: Request<CancelJobRequest>,
    ) -> Result<Response<CancelJobResponse>, Status> {
        Err(Status::unimplemented("CancelJob is not implemented"))
    }

    async fn get_job(
        &self,
        request: Request<GetJobRequest>,
    ) -> Result<Response<GetJobResponse>, Status> {
        let r = request.into_inner();
        let id = r.id.map(|id| id.int_id).unwrap_or_default();
        let job = self.meta.get_job(id).await.map_err(store_status)?;
        Ok(Response::new(GetJobResponse { job: Some(job) }))
    }

    async fn get_job_output(
        &self,
        request: Request<GetJobOutputRequest>,
    ) -> Result<Response<GetJobOutputResponse>, Status> {
        let r = request.into_inner();
        let id = r.id.as_ref().map(|id| id.int_id).unwrap_or_default();
        let status = self.meta.get_job(id).await.map_err(store_status)?;

        let name = match JobOutputType::try_from(r.r#type) {
            Ok(JobOutputType::Stdout) => STDOUT_NAME,
            Ok(JobOutputType::Stderr) => STDERR_NAME,
            Err(_) => {
                return Err(Status::invalid_argument(format!(
                    "unknown output type: {}",
                    r.r#type
                )))
            }
        };
        let task_uuid = status
            .task_id
            .as_ref()
            .map(|id| id.uuid.as_str())
            .unwrap_or_default();
        let path = task_output_path(task_uuid, name);

        let url = self
            .blob
            .presign_get(&path, OUTPUT_URL_TIME)
            .await
            .map_err(blob_status)?;
        Ok(Response::new(GetJobOutputResponse {
            location: Some(FileLocation {
                canonical_url: self.blob.canonical_url(&path),
                presigned_url: url,
            }),
        }))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let r = request.into_inner();
        let label = if r.label.is_empty() {
            None
        } else {
            Some(r.label.as_str())
        };
        let jobs = self
            .meta
            .list_jobs(r.limit, r.before_id, r.state(), label)
            .await
            .map_err(store_status)?;
        Ok(Response::new(ListJobsResponse { jobs }))
    }

    async fn update_job_labels(
        &self,
        request: Request<UpdateJobLabelsRequest>,
    ) -> Result<Response<UpdateJobLabelsResponse>, Status> {
        let r = request.into_inner();
        let id = r.id.map(|id| id.int_id).unwrap_or_default();
        self.meta
            .update_job_labels(id, &r.adds, &r.dels)
            .await
            .map_err(store_status)?;
        Ok(Response::new(UpdateJobLabelsResponse {}))
    }

    async fn insert_package(
        &self,
        request: Request<Streaming<InsertPackageRequest>>,
    ) -> Result<Response<InsertPackageResponse>, Status> {
        let mut stream = request.into_inner();

        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty upload stream"))?;
        if !matches!(first.r#type, Some(insert_package_request::Type::Spec(_))) {
            return Err(Status::invalid_argument(
                "protocol error: first message must carry the package spec",
            ));
        }

        // Spill the stream to a temp file while hashing, so large packages
        // never sit in memory twice before the hash is known.
        let tmp = tempfile::NamedTempFile::new()
            .map_err(|e| Status::internal(format!("creating temp file: {e}")))?;
        let file = tokio::fs::File::create(tmp.path())
            .await
            .map_err(|e| Status::internal(format!("opening temp file: {e}")))?;
        let mut tee = TeeHasher::new(file);

        while let Some(msg) = stream.message().await? {
            match msg.r#type {
                Some(insert_package_request::Type::Data(chunk)) => {
                    tee.write(&chunk)
                        .await
                        .map_err(|e| Status::internal(format!("spooling upload: {e}")))?;
                }
                _ => {
                    return Err(Status::invalid_argument(
                        "protocol error: expected a data chunk",
                    ))
                }
            }
        }
        let (_file, hash) = tee
            .finish()
            .await
            .map_err(|e| Status::internal(format!("spooling upload: {e}")))?;

        let data = tokio::fs::read(tmp.path())
            .await
            .map_err(|e| Status::internal(format!("reading spooled upload: {e}")))?;
        self.blob
            .put(&package_path(&hash), data.into())
            .await
            .map_err(blob_status)?;

        info!(hash = %hash, "package stored");
        Ok(Response::new(InsertPackageResponse {
            id: Some(PackageId {
                hash,
                tag: String::new(),
            }),
        }))
    }

    async fn get_package(
        &self,
        request: Request<GetPackageRequest>,
    ) -> Result<Response<GetPackageResponse>, Status> {
        let r = request.into_inner();
        let mut id = r.id.unwrap_or_default();
        self.resolve_package_id(&mut id).await?;
        self.blob
            .exists(&package_path(&id.hash))
            .await
            .map_err(blob_status)?;
        Ok(Response::new(GetPackageResponse {
            package: Some(Package {
                id: Some(id),
                spec: Some(PackageSpec::default()),
            }),
        }))
    }

    async fn update_tag(
        &self,
        request: Request<UpdateTagRequest>,
    ) -> Result<Response<UpdateTagResponse>, Status> {
        let r = request.into_inner();
        if r.tag.is_empty() {
            return Err(Status::invalid_argument("tag is empty"));
        }
        if !is_std_hash(&r.hash) {
            return Err(Status::invalid_argument(format!(
                "invalid hash {:?}",
                r.hash
            )));
        }
        self.meta
            .update_tag(&r.tag, &r.hash)
            .await
            .map_err(store_status)?;
        Ok(Response::new(UpdateTagResponse {}))
    }

    async fn list_tags(
        &self,
        _request: Request<ListTagsRequest>,
    ) -> Result<Response<ListTagsResponse>, Status> {
        let tags = self.meta.list_tags().await.map_err(store_status)?;
        Ok(Response::new(ListTagsResponse { tags }))
    }

    async fn list_flexlets(
        &self,
        _request: Request<ListFlexletsRequest>,
    ) -> Result<Response<ListFlexletsResponse>, Status> {
        let flexlets = self.meta.list_flexlets().await.map_err(store_status)?;
        Ok(Response::new(ListFlexletsResponse { flexlets }))
    }

    async fn get_stats(
        &self,
        _request: Request<GetStatsRequest>,
    ) -> Result<Response<GetStatsResponse>, Status> {
        let stats = self.meta.get_stats().await.map_err(store_status)?;
        Ok(Response::new(GetStatsResponse { stats: Some(stats) }))
    }
}
