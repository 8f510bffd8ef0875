use crate::error::TranscodeError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Audio filter chain applied to every job, in order: a high-pass/low-pass
/// band limited to speech frequencies, silence trimming from both ends (one
/// `silenceremove` pass, `start_periods` for the lead-in and `stop_periods=-1`
/// to keep trimming interior-to-trailing silence), and loudness
/// normalisation. Order matters — silenceremove operates on the already
/// band-limited signal, and loudnorm runs last so it sees the trimmed result.
const AUDIO_FILTER_CHAIN: &str = "highpass=f=100,lowpass=f=8000,\
silenceremove=start_periods=1:start_duration=1:start_threshold=-45dB:\
stop_periods=-1:stop_duration=1:stop_threshold=-45dB,loudnorm";

/// Probes `input` for audio streams using ffprobe. Returns `Ok(())` if at
/// least one audio stream is present.
pub async fn probe_audio_track(ffprobe_bin: &str, input: &Path) -> Result<(), TranscodeError> {
    let output = Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=index",
            "-of",
            "csv=p=0",
        ])
        .arg(input)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(TranscodeError::ProbeFailed(stderr));
    }

    if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(TranscodeError::NoAudioTrack);
    }

    Ok(())
}

/// Runs ffmpeg against `input`, writing the log to `log_path` and the
/// encoded artifact to `output`. Emits a progress milestone roughly every
/// ten seconds of output media via `on_progress_secs`. If `cancel` is
/// cancelled before the child exits (the runner's soft-deadline timer), the
/// child is killed and awaited (never left orphaned) and
/// `TranscodeError::Cancelled` is returned.
pub async fn transcode(
    ffmpeg_bin: &str,
    input: &Path,
    output: &Path,
    log_path: &Path,
    cancel: CancellationToken,
    mut on_progress_secs: impl FnMut(f64) + Send + 'static,
) -> Result<TranscodeOutcome, TranscodeError> {
    let mut cmd = build_command(ffmpeg_bin, input, output);
    info!(?cmd, "starting ffmpeg");

    let mut child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let log_path_owned = log_path.to_path_buf();
    let stderr_task = tokio::spawn(async move { drain_stderr_to_file(stderr, log_path_owned).await });

    let progress_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        let mut last_milestone = 0.0f64;
        while let Ok(Some(line)) = reader.next_line().await {
            if let Some(ms) = parse_out_time_ms(&line) {
                let secs = ms / 1_000_000.0;
                if secs - last_milestone >= 10.0 {
                    last_milestone = secs;
                    on_progress_secs(secs);
                }
            }
        }
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            if let Err(err) = child.start_kill() {
                warn!(error = %err, "failed to signal ffmpeg child for cancellation");
            }
            let _ = child.wait().await;
            progress_task.abort();
            let _ = stderr_task.await;
            return Err(TranscodeError::Cancelled);
        }
    };

    let _ = progress_task.await;
    if let Err(err) = stderr_task.await {
        warn!(error = %err, "ffmpeg stderr collector task panicked");
    }

    if !status.success() {
        return Err(TranscodeError::TranscodeFailed {
            exit_code: status.code(),
            log_path: log_path.display().to_string(),
        });
    }

    let meta = tokio::fs::metadata(output).await.ok();
    if meta.map(|m| m.len()).unwrap_or(0) == 0 {
        return Err(TranscodeError::InvalidOutput);
    }

    Ok(TranscodeOutcome {
        output: output.to_path_buf(),
    })
}

pub struct TranscodeOutcome {
    pub output: PathBuf,
}

fn build_command(ffmpeg_bin: &str, input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-vn", "-af", AUDIO_FILTER_CHAIN])
        .args(["-ac", "1", "-ar", "16000"])
        .args(["-c:a", "libmp3lame", "-b:a", "128k"])
        .args(["-progress", "pipe:1"])
        .arg(output)
        // If the hard task deadline fires, `run_job` drops the in-flight
        // future via `tokio::time::timeout` without running the graceful
        // cancellation path; this ensures the ffmpeg child doesn't outlive it.
        .kill_on_drop(true);
    cmd
}

fn parse_out_time_ms(line: &str) -> Option<f64> {
    line.strip_prefix("out_time_ms=")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

async fn drain_stderr_to_file(
    stderr: tokio::process::ChildStderr,
    log_path: PathBuf,
) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::create(&log_path).await?;
    let mut reader = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_out_time_ms() {
        assert_eq!(parse_out_time_ms("out_time_ms=12345678"), Some(12345678.0));
        assert_eq!(parse_out_time_ms("frame=120"), None);
    }

    #[test]
    fn filter_chain_orders_bandlimit_before_silence_trim() {
        let highpass_pos = AUDIO_FILTER_CHAIN.find("highpass").unwrap();
        let silence_pos = AUDIO_FILTER_CHAIN.find("silenceremove").unwrap();
        let loudnorm_pos = AUDIO_FILTER_CHAIN.find("loudnorm").unwrap();
        assert!(highpass_pos < silence_pos);
        assert!(silence_pos < loudnorm_pos);
    }

    #[test]
    fn build_command_sets_expected_args() {
        let cmd = build_command(
            "ffmpeg",
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out.mp3"),
        );
        let debug = format!("{cmd:?}");
        assert!(debug.contains("libmp3lame"));
        assert!(debug.contains("16000"));
    }
}
