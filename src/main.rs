use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::error;

use flexhub::blobstore;
use flexhub::metastore::MetaStore;
use flexhub::server::run_server;
use flexhub::settings::AppConfig;

#[derive(Parser, Debug)]
#[clap(version, about = "Coordinator for the Flex job-execution fabric")]
struct Args {
    /// whether to be verbose
    #[arg(short = 'v')]
    verbose: bool,

    /// path to a TOML config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .compact()
        .init();

    let cfg = AppConfig::load(args.config.as_deref())?;

    let meta = Arc::new(MetaStore::connect(&cfg.database.url).await?);
    meta.init_tables().await?;

    let blob = blobstore::from_url(&cfg.storage.url)?;

    // Bind first so we can fail fast if a port is unavailable.
    let grpc_listener = match TcpListener::bind(&cfg.server.grpc_addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(addr = %cfg.server.grpc_addr, error = %err, "failed to bind grpc listener");
            return Err(anyhow::anyhow!(err));
        }
    };
    let http_listener = if cfg.server.http_addr.is_empty() {
        None
    } else {
        Some(TcpListener::bind(&cfg.server.http_addr).await?)
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let server = tokio::spawn(run_server(
        grpc_listener,
        http_listener,
        meta,
        blob,
        cfg,
        shutdown_rx,
    ));

    // Wait for Ctrl+C, then signal shutdown and wait for the server.
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(());
    server
        .await?
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
