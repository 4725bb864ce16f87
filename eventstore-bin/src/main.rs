use std::net::SocketAddr;

use anyhow::Context;
use eventstore_bin::{resolve_backend, Config, EventStoreServer, Service};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = Config::from_env();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.max_workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.listen_port)
        .parse()
        .context("invalid listen port")?;

    let backend = cfg.backend.clone();
    let adapter = resolve_backend(&cfg).await?;
    let svc = Service::new(adapter);

    info!(%addr, %backend, max_workers = cfg.max_workers, "starting EventStore server");

    tonic::transport::Server::builder()
        .layer(TraceLayer::new_for_grpc())
        .add_service(EventStoreServer::new(svc))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "server error");
            e
        })?;

    Ok(())
}

/// Waits for either SIGINT (Ctrl-C) or, on Unix, SIGTERM, whichever comes
/// first. `serve_with_shutdown` stops accepting new connections as soon as
/// this future resolves and gives in-flight streams no additional grace
/// period.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
