use crate::error::StoreError;
use crate::job::{JobRecord, JobStatus, Submission};
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

const TERMINAL_TTL_SECONDS: i64 = 604_800; // 7 days
const QUEUE_KEY: &str = "queue:convert";
const PROCESSING_QUEUE_KEY: &str = "queue:convert:processing";

fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}

/// Typed façade over the Redis-backed state store and work queue. Job
/// records live as hashes at `job:<id>`; the queue is a pair of Redis lists
/// (`queue:convert` and `queue:convert:processing`) used in a reliable-queue
/// pattern so a dequeued item is invisible to other workers until it is
/// explicitly acknowledged or requeued after a crash.
#[derive(Clone)]
pub struct Store {
    conn: ConnectionManager,
}

impl Store {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Atomically creates a job record if one does not already exist.
    /// Returns `true` if this call created the record, `false` if a record
    /// already existed (idempotent resubmission).
    pub async fn create_job(&self, record: &JobRecord) -> Result<bool, StoreError> {
        // HSETNX on a single field, guarded behind a Lua script so the
        // whole hash is written atomically only on the winning call.
        const SCRIPT: &str = r#"
            if redis.call("EXISTS", KEYS[1]) == 1 then
                return 0
            end
            redis.call("HSET", KEYS[1], unpack(ARGV))
            return 1
        "#;

        let mut conn = self.conn.clone();
        let created: i32 = redis::Script::new(SCRIPT)
            .key(job_key(&record.job_id))
            .arg("status")
            .arg(record.status.as_str())
            .arg("created_at")
            .arg(record.created_at.to_rfc3339())
            .arg("started_at")
            .arg("")
            .arg("completed_at")
            .arg("")
            .arg("error")
            .arg("")
            .arg("input_path")
            .arg(record.input_path.to_string_lossy().to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(created == 1)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(job_key(job_id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let status = fields
            .get("status")
            .and_then(|s| JobStatus::parse(s))
            .ok_or_else(|| {
                StoreError::InvalidStatus(
                    job_id.to_string(),
                    fields.get("status").cloned().unwrap_or_default(),
                )
            })?;

        let created_at = fields
            .get("created_at")
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let started_at = fields
            .get("started_at")
            .filter(|s| !s.is_empty())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let completed_at = fields
            .get("completed_at")
            .filter(|s| !s.is_empty())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let error = fields
            .get("error")
            .filter(|s| !s.is_empty())
            .cloned();

        let input_path = fields
            .get("input_path")
            .cloned()
            .unwrap_or_default()
            .into();

        Ok(Some(JobRecord {
            job_id: job_id.to_string(),
            status,
            created_at,
            started_at,
            completed_at,
            error,
            input_path,
        }))
    }

    /// Transitions `job_id` to `new_status`. Sets `started_at` on first
    /// entry to `processing`, and on entry to a terminal state sets
    /// `completed_at`, persists `error` (if any), and applies the 7-day TTL.
    pub async fn update_status(
        &self,
        job_id: &str,
        new_status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = job_key(job_id);

        let _: () = conn.hset(&key, "status", new_status.as_str()).await?;

        if new_status == JobStatus::Processing {
            let started: String = conn.hget(&key, "started_at").await.unwrap_or_default();
            if started.is_empty() {
                let _: () = conn.hset(&key, "started_at", Utc::now().to_rfc3339()).await?;
            }
        }

        if new_status.is_terminal() {
            let _: () = conn
                .hset(&key, "completed_at", Utc::now().to_rfc3339())
                .await?;
            if let Some(err) = error {
                let _: () = conn.hset(&key, "error", err).await?;
            }
            let _: () = conn.expire(&key, TERMINAL_TTL_SECONDS).await?;
        }

        Ok(())
    }

    pub async fn enqueue(&self, submission: &Submission) -> Result<(), StoreError> {
        let payload = serde_json::to_string(submission)
            .map_err(|e| StoreError::InvalidPayload(submission.job_id.clone(), e))?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    /// Blocking pop that moves the item onto the processing list atomically
    /// (the visibility mechanism: other workers do not see items on the
    /// processing list). Returns `None` on timeout so callers can loop and
    /// check for shutdown.
    pub async fn dequeue(
        &self,
        timeout_secs: f64,
    ) -> Result<Option<Submission>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .blmove(
                QUEUE_KEY,
                PROCESSING_QUEUE_KEY,
                redis::Direction::Left,
                redis::Direction::Right,
                timeout_secs,
            )
            .await?;

        match payload {
            Some(raw) => {
                let submission: Submission = serde_json::from_str(&raw)
                    .map_err(|e| StoreError::InvalidPayload("<unknown>".to_string(), e))?;
                Ok(Some(submission))
            }
            None => Ok(None),
        }
    }

    /// Removes the acknowledged item from the in-flight processing list once
    /// the runner has durably recorded the job's terminal outcome.
    pub async fn ack(&self, submission: &Submission) -> Result<(), StoreError> {
        let payload = serde_json::to_string(submission)
            .map_err(|e| StoreError::InvalidPayload(submission.job_id.clone(), e))?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(PROCESSING_QUEUE_KEY, 1, payload).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_format() {
        assert_eq!(job_key("abc-123"), "job:abc-123");
    }
}
