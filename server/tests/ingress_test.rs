//! Router-level integration tests exercising `create_app` in-process via
//! `tower::ServiceExt::oneshot`, the idiom the teacher pack uses for axum
//! integration tests (see `ferrex-server/tests/*.rs`). These require a real
//! reachable Redis instance at `REDIS_URL` (default `redis://127.0.0.1:6379/0`),
//! matching the project's stance that Redis-backed paths are exercised
//! against a real instance rather than an in-memory fake.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mediaconvert_core::Config;
use mediaconvert_server::{create_app, AppState};
use tower::ServiceExt;

fn test_config(temp_dir: &std::path::Path) -> Config {
    Config {
        api_host: "127.0.0.1".into(),
        api_port: 0,
        redis_url: std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string()),
        worker_concurrency: 1,
        task_soft_time_limit_secs: 7200,
        task_time_limit_secs: 7500,
        temp_dir: temp_dir.to_path_buf(),
        max_upload_size_mb: 4096,
        min_disk_space_gb: 0,
        webhook_max_retries: 1,
        webhook_retry_backoff_base: 0.0,
        upload_max_retries: 1,
        upload_retry_backoff_base: 0.0,
        temp_file_ttl_seconds: 3600,
        reaper_interval_seconds: 1800,
        ffmpeg_bin: "ffmpeg".into(),
        ffprobe_bin: "ffprobe".into(),
        allow_http_callbacks: true,
        allow_private_ips: true,
    }
}

fn multipart_body(boundary: &str, fields: &[(&str, &str)], file: (&str, &str, &[u8])) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    let (field_name, filename, contents) = file;
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn health_reports_ok_when_redis_reachable() {
    let dir = tempfile::tempdir().unwrap();
    let state = match AppState::new(test_config(dir.path())).await {
        Ok(state) => state,
        Err(_) => {
            eprintln!("skipping: no reachable Redis at REDIS_URL");
            return;
        }
    };
    let app = create_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["redis"], "ok");
}

#[tokio::test]
async fn create_job_is_idempotent_for_same_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let state = match AppState::new(test_config(dir.path())).await {
        Ok(state) => state,
        Err(_) => {
            eprintln!("skipping: no reachable Redis at REDIS_URL");
            return;
        }
    };
    let app = create_app(state);

    let job_id = format!("test-idempotent-{}", uuid::Uuid::new_v4());
    let boundary = "X-BOUNDARY-MEDIACONVERT";
    let body = multipart_body(
        boundary,
        &[
            ("output_url", "https://storage.test/u/"),
            ("output_auth_token", "tok"),
            ("job_id", &job_id),
        ],
        ("file", "clip.mp4", b"not a real video"),
    );

    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/jobs")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let first = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_json: serde_json::Value = serde_json::from_slice(
        &first.into_body().collect().await.unwrap().to_bytes(),
    )
    .unwrap();
    assert_eq!(first_json["job_id"], job_id);
    assert_eq!(first_json["status"], "queued");

    let second = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second_json: serde_json::Value = serde_json::from_slice(
        &second.into_body().collect().await.unwrap().to_bytes(),
    )
    .unwrap();

    // The second submission must return the record created by the first,
    // unmodified: same job_id, same status, same created_at.
    assert_eq!(second_json["job_id"], first_json["job_id"]);
    assert_eq!(second_json["created_at"], first_json["created_at"]);

    let fetched = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
}

/// Two submissions carrying the same caller-supplied job_id fired truly
/// concurrently (not sequentially) must still settle on a single job record
/// and a single queued task, exercising the lost-create-race branch that
/// the sequential idempotency test above never reaches.
#[tokio::test]
async fn concurrent_create_job_with_same_job_id_settles_on_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let state = match AppState::new(test_config(dir.path())).await {
        Ok(state) => state,
        Err(_) => {
            eprintln!("skipping: no reachable Redis at REDIS_URL");
            return;
        }
    };
    let app = create_app(state);

    let job_id = format!("test-concurrent-{}", uuid::Uuid::new_v4());
    let boundary = "X-BOUNDARY-MEDIACONVERT";
    let body = multipart_body(
        boundary,
        &[
            ("output_url", "https://storage.test/u/"),
            ("output_auth_token", "tok"),
            ("job_id", &job_id),
        ],
        ("file", "clip.mp4", b"not a real video"),
    );

    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/jobs")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let (first, second) = tokio::join!(
        app.clone().oneshot(make_request()),
        app.clone().oneshot(make_request()),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::ACCEPTED);

    let first_json: serde_json::Value =
        serde_json::from_slice(&first.into_body().collect().await.unwrap().to_bytes()).unwrap();
    let second_json: serde_json::Value =
        serde_json::from_slice(&second.into_body().collect().await.unwrap().to_bytes()).unwrap();

    // Both requests see the same record, regardless of which one actually
    // created it.
    assert_eq!(first_json["job_id"], job_id);
    assert_eq!(second_json["job_id"], job_id);
    assert_eq!(first_json["created_at"], second_json["created_at"]);

    let fetched = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(fetched.status(), StatusCode::OK);
}
