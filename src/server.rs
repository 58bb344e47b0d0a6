//! Wires the pieces into one hub process: both gRPC surfaces behind the
//! auth gate, the REST bridge, and the Maintainer, sharing a shutdown
//! broadcast.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{error, info};

use crate::auth::{AuthGate, AuthLayer};
use crate::blobstore::BlobStore;
use crate::grpc::{FlexServiceImpl, FlexletServiceImpl};
use crate::maintainer;
use crate::metastore::MetaStore;
use crate::pb::flex::flex_service_server::FlexServiceServer;
use crate::pb::flexlet::flexlet_service_server::FlexletServiceServer;
use crate::settings::AppConfig;

/// Serves until the shutdown channel fires. `http_listener` is optional;
/// without it only the gRPC surfaces run.
pub async fn run_server(
    grpc_listener: TcpListener,
    http_listener: Option<TcpListener>,
    meta: Arc<MetaStore>,
    blob: Arc<dyn BlobStore>,
    cfg: AppConfig,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = Arc::new(FlexServiceImpl::new(meta.clone(), blob.clone()));
    let flexlet = FlexletServiceImpl::new(meta.clone(), blob.clone());

    let sweeper = maintainer::spawn(
        meta.clone(),
        cfg.maintenance.clone(),
        shutdown.resubscribe(),
    );

    if let Some(listener) = http_listener {
        let router = crate::rest::router(client.clone());
        let mut rest_shutdown = shutdown.resubscribe();
        let addr = listener.local_addr()?;
        info!(addr = %addr, "http bridge listening");
        tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = rest_shutdown.recv().await;
            });
            if let Err(err) = serve.await {
                error!(error = %err, "http bridge failed");
            }
        });
    }

    let addr = grpc_listener.local_addr()?;
    info!(addr = %addr, "grpc server listening");

    let gate = AuthGate::new(&cfg.server.password);
    let mut grpc_shutdown = shutdown.resubscribe();
    tonic::transport::Server::builder()
        .layer(AuthLayer::new(gate))
        .add_service(FlexServiceServer::from_arc(client))
        .add_service(FlexletServiceServer::new(flexlet))
        .serve_with_incoming_shutdown(TcpListenerStream::new(grpc_listener), async move {
            let _ = grpc_shutdown.recv().await;
            info!("graceful shutdown signal received");
        })
        .await?;

    info!("all connections drained, shutting down");
    sweeper.await.ok();
    Ok(())
}
