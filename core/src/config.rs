use std::{env, path::PathBuf};

/// Runtime configuration, loaded once at process boot from the environment.
/// Shared verbatim between the `api` and `worker` binaries so both processes
/// agree on paths, limits, and retry policy without a second source of truth.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,

    pub redis_url: String,

    pub worker_concurrency: usize,
    pub task_soft_time_limit_secs: u64,
    pub task_time_limit_secs: u64,

    pub temp_dir: PathBuf,
    pub max_upload_size_mb: u64,
    pub min_disk_space_gb: u64,

    pub webhook_max_retries: u32,
    pub webhook_retry_backoff_base: f64,
    pub upload_max_retries: u32,
    pub upload_retry_backoff_base: f64,

    pub temp_file_ttl_seconds: u64,
    pub reaper_interval_seconds: u64,

    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,

    pub allow_http_callbacks: bool,
    pub allow_private_ips: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string()),

            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            task_soft_time_limit_secs: env::var("TASK_SOFT_TIME_LIMIT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7200),
            task_time_limit_secs: env::var("TASK_TIME_LIMIT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7500),

            temp_dir: env::var("TEMP_DIR")
                .unwrap_or_else(|_| "/tmp/mediaconvert".to_string())
                .into(),
            max_upload_size_mb: env::var("MAX_UPLOAD_SIZE_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4096),
            min_disk_space_gb: env::var("MIN_DISK_SPACE_GB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            webhook_max_retries: env::var("WEBHOOK_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            webhook_retry_backoff_base: env::var("WEBHOOK_RETRY_BACKOFF_BASE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2.0),
            upload_max_retries: env::var("UPLOAD_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            upload_retry_backoff_base: env::var("UPLOAD_RETRY_BACKOFF_BASE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2.0),

            temp_file_ttl_seconds: env::var("TEMP_FILE_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            reaper_interval_seconds: env::var("REAPER_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),

            ffmpeg_bin: env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_bin: env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string()),

            allow_http_callbacks: env_bool("ALLOW_HTTP_CALLBACKS", false),
            allow_private_ips: env_bool("ALLOW_PRIVATE_IPS", false),
        })
    }

    /// Creates the temp root if it doesn't already exist and confirms it's a
    /// writable directory. Called by both binaries at boot; the API binary
    /// additionally purges stale children (see `storage::boot_cleanup`).
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        crate::storage::validate_temp_dir(&self.temp_dir)
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.temp_dir.join(job_id)
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
