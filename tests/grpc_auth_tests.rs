
use flexhub::pb::flex::flex_service_client::FlexServiceClient;
use flexhub::pb::flex::*;
use flexhub::pb::flexlet::flexlet_service_client::FlexletServiceClient;
use flexhub::pb::flexlet::TakeTaskRequest;
use grpc_integration_helpers::{connect, flex_client, shutdown_hub, start_hub};
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{Code, Request, Status};

#[derive(Clone)]
struct Bearer(MetadataValue<tonic::metadata::Ascii>);

impl Bearer {
    fn new(token: &str) -> Self {
        Self(
            format!("Bearer {token}")
                .parse()
                .expect("valid header value"),
        )
    }
}

impl Interceptor for Bearer {
    fn call(&mut self, mut req: Request<()>) -> Result<Request<()>, Status> {
        req.metadata_mut().insert("authorization", self.0.clone());
        Ok(req)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_token_is_unauthenticated() -> anyhow::Result<()> {
    let hub = start_hub("test-secret", false).await?;
    let mut client = flex_client(&hub).await?;

    let err = client
        .submit_job(SubmitJobRequest { spec: None })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_token_is_permission_denied() -> anyhow::Result<()> {
    let hub = start_hub("test-secret", false).await?;
    let channel = connect(hub.grpc_addr).await?;
    let mut client = FlexServiceClient::with_interceptor(channel, Bearer::new("wrong"));

    let err = client
        .submit_job(SubmitJobRequest { spec: None })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn correct_token_is_accepted() -> anyhow::Result<()> {
    let hub = start_hub("test-secret", false).await?;
    let channel = connect(hub.grpc_addr).await?;
    let mut client = FlexServiceClient::with_interceptor(channel, Bearer::new("test-secret"));

    let res = client.submit_job(SubmitJobRequest { spec: None }).await?;
    assert!(res.into_inner().id.unwrap().int_id > 0);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn read_only_methods_allow_anonymous_access() -> anyhow::Result<()> {
    let hub = start_hub("test-secret", false).await?;
    let mut client = flex_client(&hub).await?;

    // The anonymous allow-list covers dashboard reads.
    client.list_jobs(ListJobsRequest::default()).await?;
    client.list_tags(ListTagsRequest {}).await?;
    client.list_flexlets(ListFlexletsRequest {}).await?;
    client.get_stats(GetStatsRequest {}).await?;
    let err = client
        .get_job(GetJobRequest {
            id: Some(JobId { int_id: 1 }),
        })
        .await
        .unwrap_err();
    // Auth passed; the job simply does not exist.
    assert_eq!(err.code(), Code::NotFound);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn flexlet_surface_is_never_anonymous() -> anyhow::Result<()> {
    let hub = start_hub("test-secret", false).await?;
    let channel = connect(hub.grpc_addr).await?;
    let mut worker = FlexletServiceClient::new(channel);

    let err = worker
        .take_task(TakeTaskRequest {
            flexlet_name: "A".to_string(),
            wait: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_password_disables_auth() -> anyhow::Result<()> {
    let hub = start_hub("", false).await?;
    let mut client = flex_client(&hub).await?;

    let res = client.submit_job(SubmitJobRequest { spec: None }).await?;
    assert!(res.into_inner().id.unwrap().int_id > 0);

    shutdown_hub(hub).await
}
