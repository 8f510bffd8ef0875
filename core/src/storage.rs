use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Ensures the temp root exists and is a writable directory.
pub fn validate_temp_dir(temp_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(temp_dir)
        .with_context(|| format!("failed to create temp dir {}", temp_dir.display()))?;
    let metadata = std::fs::metadata(temp_dir)?;
    if !metadata.is_dir() {
        anyhow::bail!("{} exists but is not a directory", temp_dir.display());
    }
    Ok(())
}

pub fn job_dir(temp_dir: &Path, job_id: &str) -> PathBuf {
    temp_dir.join(job_id)
}

/// Creates the job directory, or succeeds silently if it already exists
/// (`create_dir_all` does not error on an existing directory). Safe to call
/// unconditionally only because the caller has already resolved the
/// create-job race against other submissions sharing this id.
pub async fn create_job_dir(temp_dir: &Path, job_id: &str) -> anyhow::Result<PathBuf> {
    let dir = job_dir(temp_dir, job_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create job dir {}", dir.display()))?;
    Ok(dir)
}

/// Free space at `path`, in GiB, via the mounted disk covering the deepest
/// matching path prefix. Returns an error if no disk claims the path (should
/// not happen once `temp_dir` is canonicalized and exists).
pub fn free_space_gb(path: &Path) -> anyhow::Result<f64> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    disks
        .list()
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space() as f64 / (1024.0 * 1024.0 * 1024.0))
        .context("no mounted disk covers the temp directory")
}

/// Checks that free space at `temp_dir` is at least `min_gb`.
pub fn has_sufficient_disk_space(temp_dir: &Path, min_gb: u64) -> bool {
    match free_space_gb(temp_dir) {
        Ok(free) => free >= min_gb as f64,
        Err(err) => {
            warn!(error = %err, "failed to read free disk space, assuming sufficient");
            true
        }
    }
}

/// Removes every immediate child of `temp_dir`, run once at API process
/// boot to discard directories orphaned by a previous incarnation crashing
/// mid-ingest. The worker process does not run this so a worker restart
/// never destroys an in-flight job directory out from under the API.
pub async fn boot_cleanup(temp_dir: &Path) -> anyhow::Result<()> {
    let mut entries = match tokio::fs::read_dir(temp_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).context("failed to read temp dir for boot cleanup"),
    };

    let mut removed = 0u32;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            if let Err(err) = tokio::fs::remove_dir_all(&path).await {
                warn!(path = %path.display(), error = %err, "failed to remove orphaned job dir at boot");
            } else {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        info!(removed, "purged orphaned job directories at boot");
    }
    Ok(())
}
