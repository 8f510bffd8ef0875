use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `f` up to `max_attempts` times, sleeping `base * 2^n + jitter`
/// seconds between attempts (`jitter` uniform in `[0, 1)`, `n` zero-indexed
/// by the number of failed attempts already completed before this sleep —
/// the first retry sleeps `base * 2^0`, matching the original's
/// `for attempt in range(max_retries): delay = base_delay * (2 ** attempt)`).
/// Re-raises the final attempt's error rather than swallowing it; callers
/// that want to swallow (e.g. webhook delivery) do so at the call site.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut f: F,
    max_attempts: u32,
    backoff_base: f64,
    operation: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    warn!(operation, attempt, %err, "final retry attempt failed");
                    return Err(err);
                }
                let delay = backoff_delay(backoff_base, attempt - 1);
                warn!(
                    operation,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(base: f64, attempt: u32) -> Duration {
    let jitter: f64 = rand::rng().random_range(0.0..1.0);
    let secs = base * 2f64.powi(attempt as i32) + jitter;
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_bounded_by_exponent() {
        // n is zero-indexed: the first retry uses n=0.
        for n in 0..5 {
            let delay = backoff_delay(2.0, n).as_secs_f64();
            let lower = 2.0 * 2f64.powi(n as i32);
            assert!(delay >= lower, "delay {delay} below lower bound {lower}");
            assert!(delay < lower + 1.0, "delay {delay} above upper bound");
        }
    }

    #[test]
    fn backoff_delay_scales_with_base_not_just_exponent() {
        // base=3 at n=1 must be ~3*2=6, not 3^1=3 and not 2^1=2.
        let delay = backoff_delay(3.0, 1).as_secs_f64();
        assert!(delay >= 6.0 && delay < 7.0, "delay {delay} not in [6,7)");
    }

    #[tokio::test]
    async fn retry_with_backoff_sleeps_base_times_two_to_the_zero_on_first_retry() {
        // base=2.0 -> first retry delay must be in [2, 3), not [4, 5) (the
        // off-by-one bug would sleep base*2^1 on the first retry instead of
        // base*2^0).
        let start = std::time::Instant::now();
        let mut calls = 0;
        let _: Result<u32, String> = retry_with_backoff(
            || {
                calls += 1;
                async move {
                    if calls == 1 {
                        Err("transient".to_string())
                    } else {
                        Ok(1)
                    }
                }
            },
            3,
            2.0,
            "test_op",
        )
        .await;
        let elapsed = start.elapsed().as_secs_f64();
        assert!(elapsed >= 2.0 && elapsed < 3.0, "elapsed {elapsed} not in [2,3)");
    }

    #[tokio::test]
    async fn retry_with_backoff_returns_ok_without_retry() {
        let result: Result<u32, String> =
            retry_with_backoff(|| async { Ok(7) }, 3, 0.0, "test_op").await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retry_with_backoff_exhausts_and_propagates_error() {
        let mut calls = 0;
        let result: Result<u32, String> = retry_with_backoff(
            || {
                calls += 1;
                async move { Err::<u32, String>("boom".to_string()) }
            },
            3,
            0.0,
            "test_op",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
