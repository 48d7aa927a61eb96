use std::future::Future;

use tokio::time::sleep;

use crate::config::{ExhaustionPolicy, RetryBudget};
use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The probe reported the resource visible after `attempts` lookups.
    Ready { attempts: u32 },
    /// Budget spent under `ExhaustionPolicy::ProceedAnyway`.
    GaveUp { attempts: u32 },
}

impl WaitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::Ready { .. })
    }
}

/// Poll `probe` until it returns `Ok(true)` or the budget runs out.
///
/// A probe error counts as "not visible yet". The sleep happens between
/// attempts, never after the last one.
pub async fn wait_until<F, Fut>(
    what: &str,
    budget: &RetryBudget,
    mut probe: F,
) -> Result<WaitOutcome, BuildError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let max_attempts = budget.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(true) => {
                tracing::debug!(what, attempt, "✅ [wait] visible");
                return Ok(WaitOutcome::Ready { attempts: attempt });
            }
            Ok(false) => {
                tracing::debug!(what, attempt, max_attempts, "⏳ [wait] not visible yet");
            }
            Err(e) => {
                tracing::debug!(what, attempt, error = %e, "⏳ [wait] lookup failed, treating as not visible");
            }
        }
        if attempt < max_attempts && !budget.interval.is_zero() {
            sleep(budget.interval).await;
        }
    }

    match budget.on_exhausted {
        ExhaustionPolicy::ProceedAnyway => {
            tracing::warn!(
                what,
                attempts = max_attempts,
                "⚠️ [wait] still not visible, proceeding anyway"
            );
            Ok(WaitOutcome::GaveUp {
                attempts: max_attempts,
            })
        }
        ExhaustionPolicy::Fail => Err(BuildError::NotYetVisible {
            resource: what.to_string(),
            attempts: max_attempts,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn budget(policy: ExhaustionPolicy) -> RetryBudget {
        RetryBudget::new(4, Duration::ZERO, policy)
    }

    #[tokio::test]
    async fn ready_on_third_probe() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome = wait_until("queue", &budget(ExhaustionPolicy::Fail), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= 3)
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn probe_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let outcome = wait_until("profile", &budget(ExhaustionPolicy::Fail), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                anyhow::bail!("throttled");
            }
            Ok(true)
        })
        .await
        .unwrap();
        assert!(outcome.is_ready());
    }

    #[tokio::test]
    async fn exhaustion_follows_policy() {
        let outcome = wait_until("profile", &budget(ExhaustionPolicy::ProceedAnyway), || async {
            Ok(false)
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::GaveUp { attempts: 4 });

        let err = wait_until("bucket", &budget(ExhaustionPolicy::Fail), || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::NotYetVisible { attempts: 4, .. }
        ));
    }
}
