//! Task runner process entrypoint. Dequeues submissions from the state
//! store's work queue and drives each job through probe -> transcode ->
//! upload -> finish, and also hosts the periodic reaper that sweeps the temp
//! root for directories whose jobs have gone terminal or vanished. Deployed
//! as a separate process from the ingress API so a worker crash mid-task
//! never takes the API down with it, and vice versa.

use clap::Parser;
use mediaconvert_core::Config;
use mediaconvert_server::{reaper, runner, AppState};
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments for the mediaconvert task runner.
#[derive(Parser, Debug)]
#[command(name = "mediaconvert-worker")]
#[command(about = "Task runner for the media-conversion job pipeline")]
struct Args {
    /// Overrides WORKER_CONCURRENCY.
    #[arg(long, env = "WORKER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Overrides TEMP_DIR.
    #[arg(long, env = "TEMP_DIR")]
    temp_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(concurrency) = args.concurrency {
        config.worker_concurrency = concurrency;
    }
    if let Some(temp_dir) = args.temp_dir {
        config.temp_dir = temp_dir;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediaconvert_server=info,mediaconvert_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.ensure_directories()?;

    let state = AppState::new(config.clone()).await?;
    state.store.ping().await.map_err(anyhow::Error::from)?;
    tracing::info!(
        concurrency = config.worker_concurrency,
        temp_dir = %config.temp_dir.display(),
        "mediaconvert-worker starting"
    );

    let (runner_shutdown_tx, runner_shutdown_rx) = oneshot::channel();
    let (reaper_shutdown_tx, reaper_shutdown_rx) = oneshot::channel();

    let runner_handle = tokio::spawn(runner::run(state.clone(), runner_shutdown_rx));
    let reaper_handle = tokio::spawn(reaper::run(state, reaper_shutdown_rx));

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight tasks");

    let _ = runner_shutdown_tx.send(());
    let _ = reaper_shutdown_tx.send(());

    let _ = tokio::join!(runner_handle, reaper_handle);

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
}
