use std::future::IntoFuture;
use std::net::SocketAddr;

use server::config::ServerConfig;
use server::{create_app, metrics, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting stream server...");
    metrics::mark_start();

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, generator={} {:?}, chunk_size={}, rate_limit={}/min",
        config.port,
        config.generator_bin,
        config.generator_args,
        config.chunk_size,
        config.rate_limit_per_minute
    );
    if config.cors_allowed_origins.is_none() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
    }

    let port = config.port;
    let app = create_app(AppState::new(config))?;

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    info!("Try: curl -N \"http://localhost:{port}/stream?freq=10&duration=5\" | play -t raw -r 44100 -e signed-integer -b 24 -c 2 -");

    // Open streams may run for hours, so shutdown does not wait for them.
    // Dropping the runtime drops every relay task, and with it each
    // generator handle, which kills the process group.
    tokio::select! {
        result = axum::serve(listener, app).into_future() => result?,
        () = shutdown_signal() => info!("Shutting down, open streams will be closed"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT (Ctrl-C)"),
        () = terminate => info!("Received SIGTERM"),
    }
}
