use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AppError;

/// Bounded retry with randomized, linearly growing backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Upper bound of the random wait before retry `n` is `base_ms * n`.
    pub base_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_ms: 100,
        }
    }

    /// `random(1, base_ms * attempt)` milliseconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let upper = (self.base_ms * attempt.max(1) as u64).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(1..=upper))
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), AppError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `op` until it returns something other than [`AppError::Conflict`],
/// retrying conflicts up to `policy.max_retries` times.
///
/// `op` receives the 1-based attempt number. Every other error is returned
/// as-is on the first occurrence.
pub async fn retry_on_conflict<T, F, Fut>(
    what: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op(attempt).await {
            Err(AppError::Conflict(reason)) => {
                if attempt > policy.max_retries {
                    debug!("Exhausted {} retries for {}", policy.max_retries, what);
                    return Err(AppError::Conflict(format!(
                        "{} still conflicting after {} attempts: {}",
                        what, attempt, reason
                    )));
                }

                let wait = policy.backoff(attempt);
                warn!(
                    "Attempt {}/{} of {} hit a conflict. Retrying in {:?}...",
                    attempt,
                    policy.max_retries + 1,
                    what,
                    wait
                );
                sleep_or_cancel(wait, cancel).await?;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const FAST: RetryPolicy = RetryPolicy {
        max_retries: 3,
        base_ms: 1,
    };

    #[test]
    fn test_backoff_stays_in_range() {
        let policy = RetryPolicy::new(10);
        for attempt in 1..=5 {
            let wait = policy.backoff(attempt);
            assert!(wait >= Duration::from_millis(1));
            assert!(wait <= Duration::from_millis(100 * attempt as u64));
        }
    }

    #[tokio::test]
    async fn test_conflict_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result = retry_on_conflict("test op", FAST, &CancellationToken::new(), |attempt| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(AppError::Conflict("busy".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_conflict() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result: Result<(), _> =
            retry_on_conflict("test op", FAST, &CancellationToken::new(), |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Conflict("busy".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        // 1 original + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result: Result<(), _> =
            retry_on_conflict("test op", FAST, &CancellationToken::new(), |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::NotFound("gone".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sleep_or_cancel(Duration::from_secs(60), &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
