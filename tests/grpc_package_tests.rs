
use flexhub::pb::flex::insert_package_request::Type;
use flexhub::pb::flex::*;
use flexhub::pb::flexlet::TakeTaskRequest;
use grpc_integration_helpers::{flex_client, flexlet_client, shutdown_hub, start_hub};
use sha2::{Digest, Sha256};
use tonic::Code;

fn upload_messages(data: &[&[u8]]) -> Vec<InsertPackageRequest> {
    let mut messages = vec![InsertPackageRequest {
        r#type: Some(Type::Spec(PackageSpec::default())),
    }];
    messages.extend(data.iter().map(|chunk| InsertPackageRequest {
        r#type: Some(Type::Data(chunk.to_vec())),
    }));
    messages
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_stores_content_addressed_package() -> anyhow::Result<()> {
    let hub = start_hub("", false).await?;
    let mut client = flex_client(&hub).await?;

    let res = client
        .insert_package(tokio_stream::iter(upload_messages(&[
            b"hello ", b"world",
        ])))
        .await?
        .into_inner();
    let hash = res.id.unwrap().hash;
    assert_eq!(hash, hex::encode(Sha256::digest(b"hello world")));

    // The blob landed at the canonical package path.
    let stored = hub.blob.get(&format!("packages/{hash}")).unwrap();
    assert_eq!(&stored[..], b"hello world");

    // And is now visible through GetPackage.
    let pkg = client
        .get_package(GetPackageRequest {
            id: Some(PackageId {
                hash: hash.clone(),
                tag: String::new(),
            }),
        })
        .await?
        .into_inner()
        .package
        .unwrap();
    assert_eq!(pkg.id.unwrap().hash, hash);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn get_package_rejects_missing_and_malformed() -> anyhow::Result<()> {
    let hub = start_hub("", false).await?;
    let mut client = flex_client(&hub).await?;

    let err = client
        .get_package(GetPackageRequest {
            id: Some(PackageId {
                hash: "f".repeat(64),
                tag: String::new(),
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    let err = client
        .get_package(GetPackageRequest {
            id: Some(PackageId {
                hash: "nonsense".to_string(),
                tag: String::new(),
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn tags_resolve_through_submission() -> anyhow::Result<()> {
    let hub = start_hub("", false).await?;
    let mut client = flex_client(&hub).await?;
    let mut worker = flexlet_client(&hub).await?;

    let hash = client
        .insert_package(tokio_stream::iter(upload_messages(&[b"tool binary"])))
        .await?
        .into_inner()
        .id
        .unwrap()
        .hash;

    client
        .update_tag(UpdateTagRequest {
            tag: "tool-latest".to_string(),
            hash: hash.clone(),
        })
        .await?;

    // Resolving through the tag works for reads...
    let pkg = client
        .get_package(GetPackageRequest {
            id: Some(PackageId {
                hash: String::new(),
                tag: "tool-latest".to_string(),
            }),
        })
        .await?
        .into_inner()
        .package
        .unwrap();
    assert_eq!(pkg.id.unwrap().hash, hash);

    // ...and for submission: the worker receives a download URL for the
    // resolved hash.
    client
        .submit_job(SubmitJobRequest {
            spec: Some(JobSpec {
                command: Some(JobCommand {
                    args: vec!["./tool".to_string()],
                }),
                inputs: Some(JobInputs {
                    packages: vec![JobPackage {
                        id: Some(PackageId {
                            hash: String::new(),
                            tag: "tool-latest".to_string(),
                        }),
                        install_dir: "bin".to_string(),
                    }],
                }),
                ..Default::default()
            }),
        })
        .await?;

    let task = worker
        .take_task(TakeTaskRequest {
            flexlet_name: "A".to_string(),
            wait: false,
        })
        .await?
        .into_inner()
        .task
        .unwrap();
    let packages = task.spec.unwrap().inputs.unwrap().packages;
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].install_dir, "bin");
    assert!(packages[0]
        .location
        .as_ref()
        .unwrap()
        .presigned_url
        .contains(&hash));

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn submitting_with_unknown_tag_fails() -> anyhow::Result<()> {
    let hub = start_hub("", false).await?;
    let mut client = flex_client(&hub).await?;

    let err = client
        .submit_job(SubmitJobRequest {
            spec: Some(JobSpec {
                inputs: Some(JobInputs {
                    packages: vec![JobPackage {
                        id: Some(PackageId {
                            hash: String::new(),
                            tag: "never-pushed".to_string(),
                        }),
                        install_dir: String::new(),
                    }],
                }),
                ..Default::default()
            }),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);

    shutdown_hub(hub).await
}

#[tokio::test(flavor = "multi_thread")]
async fn update_tag_validates_input() -> anyhow::Result<()> {
    let hub = start_hub("", false).await?;
    let mut client = flex_client(&hub).await?;

    let err = client
        .update_tag(UpdateTagRequest {
            tag: String::new(),
            hash: "a".repeat(64),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = client
        .update_tag(UpdateTagRequest {
            tag: "bad".to_string(),
            hash: "UPPERCASE".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let tags = client.list_tags(ListTagsRequest {}).await?.into_inner().tags;
    assert!(tags.is_empty());

    shutdown_hub(hub).await
}
