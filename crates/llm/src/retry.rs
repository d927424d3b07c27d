//! Capped exponential backoff retry runner: `run(provider,
//! maxRetries, canRetry, doRequest)`.

use std::future::Future;
use std::time::Duration;

use dominds_core::collab::llm::LlmError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::sleep_with_abort;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// `min(30s, 1000 * 2^attempt)` ms, no jitter — 1s/2s/4s for the first
/// three attempts, capped at 30s beyond that.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << attempt.min(20));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

/// Runs `do_request` with retry classification: retriable
/// errors are retried (while `can_retry()` is true and attempts remain)
/// with capped backoff honoring `cancel`; rejected/fatal errors surface
/// immediately.
pub async fn run_with_retry<T, F, Fut>(
    provider: &str,
    max_retries: u32,
    can_retry: impl Fn() -> bool,
    cancel: CancellationToken,
    mut do_request: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(LlmError::Fatal("cancelled".to_string()));
        }
        match do_request().await {
            Ok(value) => return Ok(value),
            Err(LlmError::Retriable(detail)) => {
                if attempt >= max_retries || !can_retry() {
                    warn!(provider, attempt, "llm request exhausted retries: {detail}");
                    return Err(LlmError::Retriable(detail));
                }
                let delay = backoff_for_attempt(attempt);
                warn!(provider, attempt, delay_ms = delay.as_millis() as u64, "retrying llm request: {detail}");
                if !sleep_with_abort(delay, &cancel).await {
                    return Err(LlmError::Fatal("cancelled during backoff".to_string()));
                }
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_matches_expected_literal_values() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(10), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_then_returns() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry("test", 5, || true, CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Retriable("not yet".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = run_with_retry("test", 5, || true, CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(LlmError::Rejected { provider: "test".into(), detail: "bad".into() }) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_surfaces_last_retriable_error() {
        let result: Result<(), LlmError> =
            run_with_retry("test", 2, || true, CancellationToken::new(), || async { Err(LlmError::Retriable("still down".into())) }).await;
        assert!(matches!(result, Err(LlmError::Retriable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn can_retry_false_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = run_with_retry("test", 5, || false, CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(LlmError::Retriable("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
