use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use mediaconvert_core::job::{JobRecord, JobStatus, Submission};
use mediaconvert_core::storage;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Serialize)]
pub struct JobCreateResponse {
    pub job_id: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status.as_str().to_string(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error,
        }
    }
}

/// `POST /jobs` — multipart submission. Fields: `file`, `output_url`,
/// `output_auth_token`, `callback_url?`, `callback_auth_token?`, `job_id?`.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(axum::http::StatusCode, Json<JobCreateResponse>)> {
    if !storage::has_sufficient_disk_space(&state.config.temp_dir, state.config.min_disk_space_gb) {
        return Err(AppError::service_unavailable(
            "Service unavailable: low disk space.",
        ));
    }

    let mut output_url: Option<String> = None;
    let mut output_auth_token: Option<String> = None;
    let mut callback_url: Option<String> = None;
    let mut callback_auth_token: Option<String> = None;
    let mut job_id: Option<String> = None;
    let mut original_filename: Option<String> = None;
    let mut file_field: Option<axum::extract::multipart::Field> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                original_filename = field.file_name().map(|s| s.to_string());
                file_field = Some(field);
            }
            Some("output_url") => {
                output_url = Some(text_of(field).await?);
            }
            Some("output_auth_token") => {
                output_auth_token = Some(text_of(field).await?);
            }
            Some("callback_url") => {
                callback_url = Some(text_of(field).await?);
            }
            Some("callback_auth_token") => {
                callback_auth_token = Some(text_of(field).await?);
            }
            Some("job_id") => {
                job_id = Some(text_of(field).await?);
            }
            _ => {}
        }
    }

    let output_url = output_url.ok_or_else(|| AppError::bad_request("missing output_url"))?;
    let output_auth_token =
        output_auth_token.ok_or_else(|| AppError::bad_request("missing output_auth_token"))?;
    let file_field = file_field.ok_or_else(|| AppError::bad_request("missing file"))?;

    let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    validate_job_id(&job_id)?;

    if let Some(existing) = state.store.get_job(&job_id).await? {
        info!(job_id, "job_already_exists");
        return Ok((
            axum::http::StatusCode::ACCEPTED,
            Json(JobCreateResponse {
                job_id: existing.job_id,
                status: existing.status.as_str().to_string(),
                created_at: existing.created_at,
            }),
        ));
    }

    let extension = original_filename
        .as_deref()
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".bin".to_string());

    // Stage the upload under a name private to this request, not the
    // job_id-keyed directory: two concurrent submissions with the same
    // caller-supplied job_id would otherwise both write into (and the loser
    // would then delete) the one directory the winner needs. `NamedTempFile`
    // cleans itself up on drop if we bail out or lose the create race below.
    let staging_file = tempfile::Builder::new()
        .prefix(".upload-")
        .suffix(&extension)
        .tempfile_in(&state.config.temp_dir)
        .map_err(|e| AppError::internal(format!("failed to create staging file: {e}")))?;

    stream_to_disk(
        file_field,
        staging_file.path(),
        state.config.max_upload_size_mb * 1024 * 1024,
    )
    .await?;

    let final_input_path =
        storage::job_dir(&state.config.temp_dir, &job_id).join(format!("input{extension}"));
    let record = JobRecord::new(job_id.clone(), final_input_path.clone());
    let created = state.store.create_job(&record).await?;

    if !created {
        // Lost the atomic create race to a concurrent submission with the
        // same caller-supplied job_id: this request's job directory was
        // never created, so there's nothing shared left to touch. The
        // staging file is discarded when it drops at the end of this scope.
        info!(job_id, "job_already_exists");
        let existing = state
            .store
            .get_job(&job_id)
            .await?
            .ok_or_else(|| AppError::internal("job record vanished after lost create race"))?;
        return Ok((
            axum::http::StatusCode::ACCEPTED,
            Json(JobCreateResponse {
                job_id: existing.job_id,
                status: existing.status.as_str().to_string(),
                created_at: existing.created_at,
            }),
        ));
    }

    // Won the race: this request owns the job directory exclusively, so
    // creating it here can never collide with another submission. The store
    // record already exists at this point, so any failure from here on must
    // drive the job to a terminal state itself rather than leaving a
    // permanently "queued" record with no enqueued task behind it.
    if let Err(err) = materialize_upload(&state, &job_id, &staging_file, &final_input_path).await {
        let message = err.to_string();
        let _ = state
            .store
            .update_status(&job_id, JobStatus::Failed, Some(&message))
            .await;
        return Err(err);
    }

    let submission = Submission {
        job_id: job_id.clone(),
        output_url,
        output_auth_token,
        callback_url,
        callback_auth_token,
        original_filename,
    };
    state.store.enqueue(&submission).await?;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(JobCreateResponse {
            job_id,
            status: "queued".to_string(),
            created_at: record.created_at,
        }),
    ))
}

/// Creates the job directory (exclusively owned by the caller, which has
/// already won the create race) and moves the staged upload into it.
async fn materialize_upload(
    state: &AppState,
    job_id: &str,
    staging_file: &tempfile::NamedTempFile,
    final_input_path: &std::path::Path,
) -> AppResult<()> {
    storage::create_job_dir(&state.config.temp_dir, job_id)
        .await
        .map_err(AppError::from)?;
    std::fs::rename(staging_file.path(), final_input_path)
        .map_err(|e| AppError::internal(format!("failed to persist upload: {e}")))
}

/// Caller-supplied `job_id` becomes a path component (`storage::job_dir`
/// joins it onto `temp_dir` directly), so it must not be usable to escape
/// that directory or name something other than a single path segment.
fn validate_job_id(job_id: &str) -> AppResult<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= 256
        && job_id != "."
        && job_id != ".."
        && !job_id.contains(std::path::is_separator)
        && !job_id.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request("invalid job_id"))
    }
}

async fn text_of(field: axum::extract::multipart::Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::bad_request(format!("invalid form field: {e}")))
}

/// Streams the multipart field to `path` without buffering it whole,
/// aborting once the running total exceeds `max_bytes`. Each `field.chunk()`
/// call yields whatever increment the underlying multipart decoder has
/// buffered (bounded well under 1 MiB in practice), matching the bounded-read
/// intent of the original's explicit 1 MiB loop without needing to force a
/// fixed read size through axum's streaming API.
async fn stream_to_disk(
    mut field: axum::extract::multipart::Field<'_>,
    path: &std::path::Path,
    max_bytes: u64,
) -> AppResult<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::internal(format!("failed to create upload destination: {e}")))?;

    let mut total: u64 = 0;
    loop {
        let chunk = field
            .chunk()
            .await
            .map_err(|e| AppError::bad_request(format!("failed reading upload: {e}")))?;
        let Some(chunk) = chunk else { break };
        total += chunk.len() as u64;
        if total > max_bytes {
            return Err(AppError::payload_too_large(format!(
                "file exceeds limit of {} bytes",
                max_bytes
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::internal(format!("failed writing upload: {e}")))?;
    }

    Ok(())
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobStatusResponse>> {
    let record = state
        .store
        .get_job(&job_id)
        .await?
        .ok_or_else(|| AppError::not_found("Job not found."))?;
    Ok(Json(record.into()))
}

pub async fn health(State(state): State<AppState>) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    let redis_ok = state.store.ping().await.is_ok();
    let disk_free_gb = storage::free_space_gb(&state.config.temp_dir).unwrap_or(0.0);
    let disk_ok = disk_free_gb >= state.config.min_disk_space_gb as f64;

    if !redis_ok {
        warn!("health check: state store unreachable");
    }

    let healthy = redis_ok && disk_ok;
    let body = json!({
        "status": if healthy { "ok" } else { "error" },
        "redis": if redis_ok { "ok" } else { "error" },
        "worker": if redis_ok { "ok" } else { "error" },
        "disk_free_gb": (disk_free_gb * 100.0).round() / 100.0,
    });

    let status = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_job_id_accepts_ordinary_ids() {
        assert!(validate_job_id("abc-123").is_ok());
        assert!(validate_job_id(&uuid::Uuid::new_v4().to_string()).is_ok());
    }

    #[test]
    fn validate_job_id_rejects_path_traversal() {
        assert!(validate_job_id("../../etc/cron.d/evil").is_err());
        assert!(validate_job_id("/etc/cron.d/evil").is_err());
        assert!(validate_job_id("..").is_err());
        assert!(validate_job_id(".").is_err());
    }

    #[test]
    fn validate_job_id_rejects_empty_and_oversized() {
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id(&"a".repeat(257)).is_err());
        assert!(validate_job_id(&"a".repeat(256)).is_ok());
    }
}
