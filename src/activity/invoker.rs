use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::{ActivityError, ActivityRegistry, Failure, FailureKind};

/// Retry behavior for a single activity invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Growth factor applied to the delay after each further attempt.
    pub backoff_multiplier: f64,
    /// Hard limit for one attempt; exceeding it counts as a transient failure.
    pub per_call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(3000),
            backoff_multiplier: 1.0,
            per_call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    /// delay = initial_backoff * multiplier^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exp);
        if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            self.initial_backoff
        }
    }
}

/// Runs named activities with bounded retries and a per-call timeout.
#[derive(Clone)]
pub struct ActivityInvoker {
    registry: Arc<ActivityRegistry>,
}

impl ActivityInvoker {
    pub fn new(registry: ActivityRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Invoke `name` until it succeeds, fails permanently, or runs out of attempts.
    ///
    /// A permanent failure is returned as reported by the activity. Exhausting
    /// the attempts yields a synthetic transient failure naming the last reason.
    pub async fn invoke(&self, name: &str, payload: Value, policy: &RetryPolicy) -> Result<Value, Failure> {
        let activity = self
            .registry
            .get(name)
            .ok_or_else(|| Failure::permanent(format!("unknown activity: {name}")))?;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(policy.per_call_timeout, activity.run(payload.clone())).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ActivityError::Timeout(policy.per_call_timeout)),
            };

            let failure = match result {
                Ok(output) => {
                    debug!(activity = name, attempt, "activity succeeded");
                    return Ok(output);
                }
                Err(err) => Failure::from(err),
            };

            match failure.kind {
                FailureKind::Permanent => {
                    warn!(activity = name, attempt, kind = %failure.kind, reason = %failure.reason, "activity failed");
                    return Err(failure);
                }
                FailureKind::Transient if attempt >= max_attempts => {
                    warn!(activity = name, attempt, kind = %failure.kind, reason = %failure.reason, "activity retries exhausted");
                    return Err(Failure::transient(format!(
                        "{name} failed after {attempt} attempts: {}",
                        failure.reason
                    )));
                }
                FailureKind::Transient => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        activity = name,
                        attempt,
                        max_attempts,
                        reason = %failure.reason,
                        delay_ms = delay.as_millis() as u64,
                        "retrying activity"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::success;
    use crate::activity::testing::ScriptedActivity;
    use tokio::time::Instant;

    const NAME: &str = "TestActivity";

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    #[test]
    fn default_policy_matches_runtime_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(3000));
        assert_eq!(policy.backoff_multiplier, 1.0);
        assert_eq!(policy.per_call_timeout, Duration::from_secs(60));
    }

    #[test]
    fn backoff_grows_by_multiplier() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
    }

    #[test]
    fn unit_multiplier_keeps_delay_constant() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), policy.delay_for_attempt(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_stop_at_max_attempts() {
        let activity = ScriptedActivity::failing(NAME, || ActivityError::Unexpected("network down".into()));
        let probe = activity.probe();
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(activity));

        let started = Instant::now();
        let failure = invoker.invoke(NAME, Value::Null, &policy(3)).await.unwrap_err();

        assert_eq!(probe.calls(), 3);
        assert_eq!(failure.kind, FailureKind::Transient);
        assert!(failure.reason.contains("after 3 attempts"));
        assert!(failure.reason.contains("network down"));
        // Two waits of 3s between three attempts.
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_never_retried() {
        let activity = ScriptedActivity::failing(NAME, || ActivityError::BusinessRule("already revoked".into()));
        let probe = activity.probe();
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(activity));

        let failure = invoker.invoke(NAME, Value::Null, &policy(5)).await.unwrap_err();

        assert_eq!(probe.calls(), 1);
        assert_eq!(
            failure,
            Failure::permanent("business rule violated: already revoked")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let activity = ScriptedActivity::new(NAME, |attempt| {
            if attempt == 1 {
                Err(ActivityError::Unexpected("flaky".into()))
            } else {
                success()
            }
        });
        let probe = activity.probe();
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(activity));

        invoker.invoke(NAME, Value::Null, &policy(3)).await.unwrap();
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_as_transient() {
        let activity = ScriptedActivity::succeeding(NAME).with_delay(Duration::from_secs(120));
        let probe = activity.probe();
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(activity));

        let failure = invoker.invoke(NAME, Value::Null, &policy(2)).await.unwrap_err();

        assert_eq!(probe.calls(), 2);
        assert_eq!(failure.kind, FailureKind::Transient);
        assert!(failure.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_activity_is_permanent() {
        let invoker = ActivityInvoker::new(ActivityRegistry::new());
        let failure = invoker.invoke("Missing", Value::Null, &policy(3)).await.unwrap_err();
        assert!(failure.is_permanent());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let activity = ScriptedActivity::failing(NAME, || ActivityError::Unexpected("down".into()));
        let probe = activity.probe();
        let invoker = ActivityInvoker::new(ActivityRegistry::new().with(activity));

        invoker.invoke(NAME, Value::Null, &policy(0)).await.unwrap_err();
        assert_eq!(probe.calls(), 1);
    }
}
