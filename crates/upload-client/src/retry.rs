//! Per-chunk retry executor with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Attempt budget and backoff for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum total attempts per chunk (the first send included).
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    /// Effective attempt budget; a zero setting still allows one send.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `initial_backoff × 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exp)
            .unwrap_or(Duration::MAX)
    }
}

/// How a chunk's delivery ended.
#[derive(Debug)]
pub enum ChunkOutcome<T> {
    /// The receiver acknowledged the chunk.
    Delivered(T),
    /// The job's token fired; the chunk goes back to the pool.
    Aborted,
    /// A fatal error, or the attempt budget ran out.
    Failed(TransportError),
}

/// Runs `op` until it succeeds, fails fatally, exhausts the budget or is
/// cancelled.
///
/// `attempts` carries the number of attempts already spent on this chunk and
/// is updated in place, so a chunk that is paused and resumed keeps its
/// budget. Attempts cut short by cancellation are not counted.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    attempts: &mut u32,
    mut op: F,
) -> ChunkOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    loop {
        if cancel.is_cancelled() {
            return ChunkOutcome::Aborted;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return ChunkOutcome::Aborted,
            result = op() => result,
        };

        let err = match result {
            Ok(value) => {
                *attempts = attempts.saturating_add(1);
                return ChunkOutcome::Delivered(value);
            }
            Err(TransportError::Aborted) => return ChunkOutcome::Aborted,
            Err(e) => e,
        };

        *attempts = attempts.saturating_add(1);

        if !err.is_retryable() {
            debug!(error = %err, attempts = *attempts, "fatal chunk error");
            return ChunkOutcome::Failed(err);
        }
        if *attempts >= policy.max_attempts() {
            warn!(error = %err, attempts = *attempts, "retry budget exhausted");
            return ChunkOutcome::Failed(err);
        }

        let delay = policy.delay_for_attempt(*attempts);
        debug!(
            error = %err,
            attempt = *attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying chunk"
        );

        tokio::select! {
            _ = cancel.cancelled() => return ChunkOutcome::Aborted,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_protocol::RejectReason;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> TransportError {
        TransportError::Rejected {
            reason: RejectReason::RateLimited,
            message: "too many requests".into(),
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn backoff_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_for_attempt(40), Duration::MAX);
    }

    #[test]
    fn zero_budget_still_sends_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_stops_after_budget() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut attempts = 0;

        let start = tokio::time::Instant::now();
        let outcome: ChunkOutcome<()> = execute(&policy, &cancel, &mut attempts, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(rate_limited())
        })
        .await;

        assert!(matches!(outcome, ChunkOutcome::Failed(ref e) if e.is_retryable()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(attempts, 3);
        // 500ms after the first failure, 1000ms after the second.
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut attempts = 0;

        let outcome = execute(&policy, &cancel, &mut attempts, || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransportError::Connection("reset".into()))
            } else {
                Ok(7u32)
            }
        })
        .await;

        assert!(matches!(outcome, ChunkOutcome::Delivered(7)));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut attempts = 0;

        let outcome: ChunkOutcome<()> = execute(&policy, &cancel, &mut attempts, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Rejected {
                reason: RejectReason::InvalidPath,
                message: "escapes root".into(),
            })
        })
        .await;

        assert!(matches!(
            outcome,
            ChunkOutcome::Failed(TransportError::Rejected {
                reason: RejectReason::InvalidPath,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_carries_over_between_runs() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut attempts = 2;

        let outcome: ChunkOutcome<()> = execute(&policy, &cancel, &mut attempts, || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(rate_limited())
        })
        .await;

        assert!(matches!(outcome, ChunkOutcome::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_is_aborted() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut attempts = 1;

        let outcome: ChunkOutcome<()> =
            execute(&policy, &cancel, &mut attempts, || async { Ok(()) }).await;

        assert!(matches!(outcome, ChunkOutcome::Aborted));
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_is_aborted() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let mut attempts = 0;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome: ChunkOutcome<()> = execute(&policy, &cancel, &mut attempts, || async {
            Err(rate_limited())
        })
        .await;

        assert!(matches!(outcome, ChunkOutcome::Aborted));
        assert_eq!(attempts, 1);
    }
}
