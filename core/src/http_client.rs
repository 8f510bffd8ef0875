use crate::config::Config;
use crate::error::HttpClientError;
use crate::retry::retry_with_backoff;
use crate::security::is_safe_url;
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Shared outbound HTTP client: artifact upload (streaming PUT) and webhook
/// delivery (POST), both SSRF-guarded and retried with backoff.
#[derive(Clone)]
pub struct HttpClient {
    upload_client: Client,
    webhook_client: Client,
    allow_http_callbacks: bool,
    allow_private_ips: bool,
}

impl HttpClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let upload_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;

        let webhook_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            upload_client,
            webhook_client,
            allow_http_callbacks: config.allow_http_callbacks,
            allow_private_ips: config.allow_private_ips,
        })
    }

    /// Streams `file_path`'s contents to `output_url` via HTTP PUT, in ≥64
    /// KiB chunks read off a background thread, retrying on transport
    /// errors and non-2xx responses. Appends the artifact's filename to
    /// `output_url` if it doesn't already end with it.
    pub async fn upload_artifact(
        &self,
        file_path: &Path,
        output_url: &str,
        auth_token: &str,
        job_id: &str,
        max_retries: u32,
        backoff_base: f64,
    ) -> Result<(), HttpClientError> {
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut target = output_url.to_string();
        if !target.ends_with(&filename) {
            if !target.ends_with('/') {
                target.push('/');
            }
            target.push_str(&filename);
        }

        if !is_safe_url(&target, self.allow_http_callbacks, self.allow_private_ips).await {
            return Err(HttpClientError::UnsafeUrl(target));
        }

        info!(job_id, url = %target, "upload_started");

        retry_with_backoff(
            || self.do_upload(file_path, &target, auth_token),
            max_retries,
            backoff_base,
            "artifact_upload",
        )
        .await?;

        info!(job_id, "upload_completed");
        Ok(())
    }

    async fn do_upload(
        &self,
        file_path: &Path,
        target: &str,
        auth_token: &str,
    ) -> Result<(), HttpClientError> {
        let file = tokio::fs::File::open(file_path).await?;
        let stream = ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE);
        let body = reqwest::Body::wrap_stream(stream);

        let response = self
            .upload_client
            .put(target)
            .bearer_auth(auth_token)
            .header("Content-Type", "audio/mpeg")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HttpClientError::BadStatus(response.status()));
        }
        Ok(())
    }

    /// Fires the completion webhook. Errors are logged, never propagated —
    /// webhook delivery never fails a job.
    pub async fn fire_webhook(
        &self,
        callback_url: &str,
        job_id: &str,
        status: &str,
        error_message: Option<&str>,
        auth_token: Option<&str>,
        max_retries: u32,
        backoff_base: f64,
    ) {
        if !is_safe_url(callback_url, self.allow_http_callbacks, self.allow_private_ips).await {
            error!(job_id, url = callback_url, "webhook_blocked_insecure_url");
            return;
        }

        let payload = WebhookPayload {
            job_id: job_id.to_string(),
            status: status.to_string(),
            error: error_message.map(|s| s.to_string()),
        };

        info!(job_id, url = callback_url, status, "firing_webhook");

        let result = retry_with_backoff(
            || self.do_webhook(callback_url, &payload, auth_token),
            max_retries,
            backoff_base,
            "webhook_delivery",
        )
        .await;

        match result {
            Ok(()) => info!(job_id, "webhook_delivered"),
            Err(err) => error!(job_id, url = callback_url, %err, "webhook_failed_permanently"),
        }
    }

    async fn do_webhook(
        &self,
        callback_url: &str,
        payload: &WebhookPayload,
        auth_token: Option<&str>,
    ) -> Result<(), HttpClientError> {
        let mut request = self.webhook_client.post(callback_url).json(payload);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(HttpClientError::BadStatus(response.status()));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload {
    job_id: String,
    status: String,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn upload_appends_filename_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("output.mp3");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(b"not really mp3 data").unwrap();

        // SSRF guard rejects the unroutable test host before any network
        // call is attempted, which is exactly the behaviour this test
        // verifies: the filename-append happens before the safety check.
        let config = Config {
            allow_http_callbacks: true,
            allow_private_ips: false,
            ..test_config()
        };
        let client = HttpClient::new(&config).unwrap();
        let result = client
            .upload_artifact(&file_path, "http://10.0.0.9/dest", "tok", "job-1", 1, 0.0)
            .await;
        assert!(matches!(result, Err(HttpClientError::UnsafeUrl(url)) if url.ends_with("output.mp3")));
    }

    fn test_config() -> Config {
        Config {
            api_host: "0.0.0.0".into(),
            api_port: 8000,
            redis_url: "redis://127.0.0.1:6379".into(),
            worker_concurrency: 1,
            task_soft_time_limit_secs: 10,
            task_time_limit_secs: 20,
            temp_dir: std::env::temp_dir(),
            max_upload_size_mb: 1,
            min_disk_space_gb: 0,
            webhook_max_retries: 1,
            webhook_retry_backoff_base: 0.0,
            upload_max_retries: 1,
            upload_retry_backoff_base: 0.0,
            temp_file_ttl_seconds: 1,
            reaper_interval_seconds: 1,
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
            allow_http_callbacks: false,
            allow_private_ips: false,
        }
    }
}
