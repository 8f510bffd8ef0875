//! Ingress API process entrypoint. Hosts the axum router from
//! `mediaconvert_server::create_app` and performs the one-time boot purge of
//! the temp root (directories orphaned by a previous incarnation's crash).
//! The worker process does not purge the temp root, so an API restart never
//! destroys a job directory a worker is actively driving.

use clap::Parser;
use mediaconvert_core::{storage, Config};
use mediaconvert_server::{create_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments for the mediaconvert ingress API.
#[derive(Parser, Debug)]
#[command(name = "mediaconvert-api")]
#[command(about = "HTTP ingress for the media-conversion job pipeline")]
struct Args {
    /// Overrides API_HOST.
    #[arg(long, env = "API_HOST")]
    host: Option<String>,

    /// Overrides API_PORT.
    #[arg(long, env = "API_PORT")]
    port: Option<u16>,

    /// Overrides TEMP_DIR.
    #[arg(long, env = "TEMP_DIR")]
    temp_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(host) = args.host {
        config.api_host = host;
    }
    if let Some(port) = args.port {
        config.api_port = port;
    }
    if let Some(temp_dir) = args.temp_dir {
        config.temp_dir = temp_dir;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediaconvert_server=info,mediaconvert_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.ensure_directories()?;
    storage::boot_cleanup(&config.temp_dir).await?;
    tracing::info!(temp_dir = %config.temp_dir.display(), "temp root ready");

    let state = AppState::new(config.clone()).await?;
    state.store.ping().await.map_err(anyhow::Error::from)?;
    tracing::info!("connected to state store");

    let app = create_app(state);

    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "mediaconvert-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
