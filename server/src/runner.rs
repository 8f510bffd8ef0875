use mediaconvert_core::job::{JobStatus, Submission};
use mediaconvert_core::{storage, transcoder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::state::AppState;

const TASK_MAX_RETRIES: u32 = 3;
const TASK_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Runs the task-runner fan-out loop until `shutdown` resolves: repeatedly
/// dequeues a submission and spawns it onto a semaphore-bounded worker task.
/// Each worker processes exactly one job end to end before returning to the
/// pool.
pub async fn run(state: AppState, mut shutdown: oneshot::Receiver<()>) {
    let semaphore = Arc::new(Semaphore::new(state.config.worker_concurrency));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("runner shutting down");
                break;
            }
            dequeued = state.store.dequeue(5.0) => {
                match dequeued {
                    Ok(Some(submission)) => {
                        let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                        let state = state.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            run_job(&state, submission).await;
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "failed to dequeue from state store");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

async fn run_job(state: &AppState, submission: Submission) {
    let job_id = submission.job_id.clone();
    info!(job_id, "task_received");

    let hard_deadline = Duration::from_secs(state.config.task_time_limit_secs);
    let outcome = tokio::time::timeout(hard_deadline, process_job(state, &submission)).await;

    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            error!(job_id, "task hard deadline exceeded");
            Err("Task timeout".to_string())
        }
    };

    match result {
        Ok(()) => {
            finish_job(state, &submission, JobStatus::Completed, None).await;
        }
        Err(error_message) => {
            finish_job(state, &submission, JobStatus::Failed, Some(error_message)).await;
        }
    }

    if let Err(err) = state.store.ack(&submission).await {
        warn!(job_id, error = %err, "failed to acknowledge processed submission");
    }

    // Cleanup is deliberately skipped here: the job directory is left in
    // place for post-mortem diagnostics and removed only by the reaper once
    // it ages past the TTL.
}

/// Drives the full pipeline for one job, racing it against the soft
/// deadline: a background timer cancels `cancel_token` after
/// `task_soft_time_limit_secs`, which propagates into the transcoder driver
/// and unwinds the current attempt as a non-retryable `Cancelled` failure.
/// The outer hard-deadline `tokio::time::timeout` in `run_job` is the
/// second, unconditional backstop.
async fn process_job(state: &AppState, submission: &Submission) -> Result<(), String> {
    let cancel_token = CancellationToken::new();
    let soft_deadline = Duration::from_secs(state.config.task_soft_time_limit_secs);
    let soft_timer = {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(soft_deadline).await;
            token.cancel();
        })
    };

    let result = process_job_inner(state, submission, cancel_token).await;
    soft_timer.abort();
    result
}

async fn process_job_inner(
    state: &AppState,
    submission: &Submission,
    cancel_token: CancellationToken,
) -> Result<(), String> {
    let job_id = &submission.job_id;

    state
        .store
        .update_status(job_id, JobStatus::Processing, None)
        .await
        .map_err(|e| e.to_string())?;

    let job_dir = storage::job_dir(&state.config.temp_dir, job_id);
    let input_path = find_input_file(&job_dir)
        .await
        .ok_or_else(|| "Input file not found.".to_string())?;

    let output_path = job_dir.join("output.mp3");
    let log_path = job_dir.join("ffmpeg.log");

    run_transcode_with_retry(
        state,
        job_id,
        &input_path,
        &output_path,
        &log_path,
        &cancel_token,
    )
    .await?;

    state
        .store
        .update_status(job_id, JobStatus::Uploading, None)
        .await
        .map_err(|e| e.to_string())?;

    let final_output = rename_to_derived_name(&job_dir, &output_path, submission.original_filename.as_deref())
        .await
        .map_err(|e| e.to_string())?;

    state
        .http
        .upload_artifact(
            &final_output,
            &submission.output_url,
            &submission.output_auth_token,
            job_id,
            state.config.upload_max_retries,
            state.config.upload_retry_backoff_base,
        )
        .await
        .map_err(|e| format!("upload failed: {e}"))?;

    Ok(())
}

async fn run_transcode_with_retry(
    state: &AppState,
    job_id: &str,
    input_path: &std::path::Path,
    output_path: &std::path::Path,
    log_path: &std::path::Path,
    cancel_token: &CancellationToken,
) -> Result<(), String> {
    let mut attempt = 0;
    loop {
        if cancel_token.is_cancelled() {
            return Err(mediaconvert_core::error::TranscodeError::Cancelled.to_string());
        }

        if let Err(err) = transcoder::probe_audio_track(&state.config.ffprobe_bin, input_path).await {
            if err.is_retryable() && attempt < TASK_MAX_RETRIES {
                attempt += 1;
                warn!(job_id, attempt, error = %err, "retrying probe after failure");
                tokio::time::sleep(TASK_RETRY_DELAY).await;
                continue;
            }
            return Err(err.to_string());
        }

        let job_id_owned = job_id.to_string();
        let result = transcoder::transcode(
            &state.config.ffmpeg_bin,
            input_path,
            output_path,
            log_path,
            cancel_token.clone(),
            move |secs| info!(job_id = %job_id_owned, secs, "transcode progress"),
        )
        .await;

        match result {
            Ok(_) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < TASK_MAX_RETRIES => {
                attempt += 1;
                warn!(job_id, attempt, error = %err, "retrying transcode after failure");
                tokio::time::sleep(TASK_RETRY_DELAY).await;
            }
            Err(err) if err.is_retryable() => {
                return Err(format!("FFmpeg failed after retries: {err}"));
            }
            Err(err) => return Err(err.to_string()),
        }
    }
}

async fn find_input_file(job_dir: &std::path::Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(job_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path
            .file_stem()
            .map(|stem| stem == "input")
            .unwrap_or(false)
        {
            return Some(path);
        }
    }
    None
}

/// Renames the job's `output.mp3` to `<basename(original_filename)>.mp3`,
/// falling back to leaving it as `output.mp3` when no original filename was
/// supplied.
async fn rename_to_derived_name(
    job_dir: &std::path::Path,
    current: &std::path::Path,
    original_filename: Option<&str>,
) -> anyhow::Result<PathBuf> {
    let Some(original) = original_filename else {
        return Ok(current.to_path_buf());
    };

    let stem = std::path::Path::new(original)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let target = job_dir.join(format!("{stem}.mp3"));

    if target != current {
        tokio::fs::rename(current, &target).await?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_input_file_matches_any_extension() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("input.mov"), b"x").await.unwrap();

        let found = find_input_file(dir.path()).await.unwrap();
        assert_eq!(found.file_name().unwrap(), "input.mov");
    }

    #[tokio::test]
    async fn find_input_file_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_input_file(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn rename_to_derived_name_uses_original_stem() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.mp3");
        tokio::fs::write(&output, b"x").await.unwrap();

        let target = rename_to_derived_name(dir.path(), &output, Some("lecture.mp4"))
            .await
            .unwrap();
        assert_eq!(target.file_name().unwrap(), "lecture.mp3");
        assert!(tokio::fs::try_exists(&target).await.unwrap());
    }

    #[tokio::test]
    async fn rename_to_derived_name_falls_back_without_original_filename() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.mp3");
        tokio::fs::write(&output, b"x").await.unwrap();

        let target = rename_to_derived_name(dir.path(), &output, None).await.unwrap();
        assert_eq!(target, output);
    }
}

async fn finish_job(
    state: &AppState,
    submission: &Submission,
    status: JobStatus,
    error: Option<String>,
) {
    if let Err(err) = state
        .store
        .update_status(&submission.job_id, status, error.as_deref())
        .await
    {
        error!(job_id = %submission.job_id, error = %err, "failed to persist terminal job status");
    }

    if let Some(callback_url) = &submission.callback_url {
        state
            .http
            .fire_webhook(
                callback_url,
                &submission.job_id,
                status.as_str(),
                error.as_deref(),
                submission.callback_auth_token.as_deref(),
                state.config.webhook_max_retries,
                state.config.webhook_retry_backoff_base,
            )
            .await;
    }
}
