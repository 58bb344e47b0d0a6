//! HTTP/JSON facade for dashboards and scripting: a thin bridge that
//! invokes the client service on itself and reshapes responses as JSON.
//! Fields are always emitted, populated or not, to keep UI code dumb.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tonic::{Code, Request};

use crate::grpc::FlexServiceImpl;
use crate::metastore::{format_flexlet_state, format_job_state, parse_job_state};
use crate::pb::flex::flex_service_server::FlexService;
use crate::pb::flex::get_job_output_request::JobOutputType;
use crate::pb::flex::*;

#[derive(Clone)]
pub struct RestState {
    client: Arc<FlexServiceImpl>,
}

pub fn router(client: Arc<FlexServiceImpl>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/stdout", get(get_stdout))
        .route("/api/jobs/:id/stderr", get(get_stderr))
        .route("/api/flexlets", get(list_flexlets))
        .route("/api/stats", get(get_stats))
        .with_state(RestState { client })
}

struct RestError(tonic::Status);

impl From<tonic::Status> for RestError {
    fn from(status: tonic::Status) -> Self {
        Self(status)
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let code = match self.0.code() {
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, self.0.message().to_string()).into_response()
    }
}

#[derive(Serialize)]
struct JobJson {
    id: i64,
    state: String,
    priority: i32,
    command: Vec<String>,
    labels: Vec<String>,
    time_limit_secs: i64,
    task_uuid: String,
    flexlet: String,
    exit_code: i32,
    message: String,
}

fn job_json(status: &JobStatus) -> JobJson {
    let job = status.job.clone().unwrap_or_default();
    let spec = job.spec.unwrap_or_default();
    let result = status.result.clone().unwrap_or_default();
    JobJson {
        id: job.id.map(|id| id.int_id).unwrap_or_default(),
        state: format_job_state(status.state()).to_string(),
        priority: spec
            .constraints
            .as_ref()
            .map(|c| c.priority)
            .unwrap_or_default(),
        command: spec.command.map(|c| c.args).unwrap_or_default(),
        labels: spec.annotations.map(|a| a.labels).unwrap_or_default(),
        time_limit_secs: spec
            .limits
            .and_then(|l| l.time)
            .map(|d| d.seconds)
            .unwrap_or_default(),
        task_uuid: status
            .task_id
            .as_ref()
            .map(|id| id.uuid.clone())
            .unwrap_or_default(),
        flexlet: status
            .flexlet_id
            .as_ref()
            .map(|id| id.name.clone())
            .unwrap_or_default(),
        exit_code: result.exit_code,
        message: result.message,
    }
}

#[derive(Serialize)]
struct FlexletJson {
    name: String,
    state: String,
    cores: i32,
    current_jobs: Vec<i64>,
}

fn flexlet_json(status: &FlexletStatus) -> FlexletJson {
    let flexlet = status.flexlet.clone().unwrap_or_default();
    FlexletJson {
        name: flexlet.id.map(|id| id.name).unwrap_or_default(),
        state: format_flexlet_state(status.state()).to_string(),
        cores: flexlet.spec.map(|s| s.cores).unwrap_or_default(),
        current_jobs: status
            .current_jobs
            .iter()
            .filter_map(|job| job.id.as_ref().map(|id| id.int_id))
            .collect(),
    }
}

#[derive(Serialize)]
struct StatsJson {
    pending_jobs: i64,
    running_jobs: i64,
    online_flexlets: i32,
    offline_flexlets: i32,
    busy_cores: i32,
    idle_cores: i32,
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct JobsQuery {
    limit: Option<i64>,
    before: Option<i64>,
    state: Option<String>,
    label: Option<String>,
}

async fn list_jobs(
    State(state): State<RestState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<JobJson>>, RestError> {
    let job_state = match &query.state {
        Some(s) => parse_job_state(s)
            .map_err(|e| tonic::Status::invalid_argument(e.to_string()))?,
        None => JobState::Unspecified,
    };
    let res = state
        .client
        .list_jobs(Request::new(ListJobsRequest {
            limit: query.limit.unwrap_or(100),
            before_id: query.before.unwrap_or_default(),
            state: job_state as i32,
            label: query.label.unwrap_or_default(),
        }))
        .await?;
    Ok(Json(res.get_ref().jobs.iter().map(job_json).collect()))
}

async fn get_job(
    State(state): State<RestState>,
    Path(id): Path<i64>,
) -> Result<Json<JobJson>, RestError> {
    let res = state
        .client
        .get_job(Request::new(GetJobRequest {
            id: Some(JobId { int_id: id }),
        }))
        .await?;
    let status = res.get_ref().job.clone().unwrap_or_default();
    Ok(Json(job_json(&status)))
}

async fn job_output(
    state: &RestState,
    id: i64,
    output: JobOutputType,
) -> Result<Redirect, RestError> {
    let res = state
        .client
        .get_job_output(Request::new(GetJobOutputRequest {
            id: Some(JobId { int_id: id }),
            r#type: output as i32,
        }))
        .await?;
    let location = res.get_ref().location.clone().unwrap_or_default();
    Ok(Redirect::temporary(&location.presigned_url))
}

async fn get_stdout(
    State(state): State<RestState>,
    Path(id): Path<i64>,
) -> Result<Redirect, RestError> {
    job_output(&state, id, JobOutputType::Stdout).await
}

async fn get_stderr(
    State(state): State<RestState>,
    Path(id): Path<i64>,
) -> Result<Redirect, RestError> {
    job_output(&state, id, JobOutputType::Stderr).await
}

async fn list_flexlets(
    State(state): State<RestState>,
) -> Result<Json<Vec<FlexletJson>>, RestError> {
    let res = state
        .client
        .list_flexlets(Request::new(ListFlexletsRequest {}))
        .await?;
    Ok(Json(
        res.get_ref().flexlets.iter().map(flexlet_json).collect(),
    ))
}

async fn get_stats(State(state): State<RestState>) -> Result<Json<StatsJson>, RestError> {
    let res = state
        .client
        .get_stats(Request::new(GetStatsRequest {}))
        .await?;
    let stats = res.get_ref().stats.clone().unwrap_or_default();
    let job = stats.job.unwrap_or_default();
    let flexlet = stats.flexlet.unwrap_or_default();
    Ok(Json(StatsJson {
        pending_jobs: job.pending_jobs,
        running_jobs: job.running_jobs,
        online_flexlets: flexlet.online_flexlets,
        offline_flexlets: flexlet.offline_flexlets,
        busy_cores: flexlet.busy_cores,
        idle_cores: flexlet.idle_cores,
    }))
}
