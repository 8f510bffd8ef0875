use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::state::AppState;

/// Periodically sweeps the temp root for directories older than the
/// configured TTL whose job record is absent or terminal, and removes them.
/// Active (non-terminal) jobs are never touched regardless of age.
pub async fn run(state: AppState, mut shutdown: oneshot::Receiver<()>) {
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.reaper_interval_seconds));
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("reaper shutting down");
                break;
            }
            _ = interval.tick() => {
                if let Err(err) = sweep(&state).await {
                    warn!(error = %err, "reaper sweep failed");
                }
            }
        }
    }
}

async fn sweep(state: &AppState) -> anyhow::Result<()> {
    let temp_dir = &state.config.temp_dir;
    let ttl = Duration::from_secs(state.config.temp_file_ttl_seconds);

    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let mut removed = 0u32;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(job_id) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let metadata = entry.metadata().await?;
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or(Duration::ZERO);

        if age <= ttl {
            continue;
        }

        let record = state.store.get_job(&job_id).await?;
        let should_remove = match record {
            None => true,
            Some(record) => record.status.is_terminal(),
        };

        if should_remove {
            info!(job_id, "cleaning_orphaned_dir");
            if let Err(err) = tokio::fs::remove_dir_all(&path).await {
                warn!(job_id, error = %err, "failed to remove orphaned job dir");
            } else {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        info!(removed, "periodic cleanup removed stale job directories");
    }
    Ok(())
}
