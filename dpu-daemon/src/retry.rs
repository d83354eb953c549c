//! Bounded retry policy for bridge-port RPCs.
//!
//! The policy has the same shape as a gRPC service-config `retryPolicy`
//! and can be loaded from that JSON form:
//!
//! ```json
//! {
//!   "maxAttempts": 40,
//!   "initialBackoff": "1s",
//!   "maxBackoff": "16s",
//!   "backoffMultiplier": 2.0,
//!   "retryableConditions": ["UNAVAILABLE"]
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::connector::ConnectError;

/// Status conditions a call may be retried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryCondition {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    Aborted,
}

impl RetryCondition {
    pub fn matches(&self, code: Code) -> bool {
        matches!(
            (self, code),
            (RetryCondition::Unavailable, Code::Unavailable)
                | (RetryCondition::DeadlineExceeded, Code::DeadlineExceeded)
                | (RetryCondition::ResourceExhausted, Code::ResourceExhausted)
                | (RetryCondition::Aborted, Code::Aborted)
        )
    }
}

/// Retry policy errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("maxAttempts must be at least 1")]
    NoAttempts,

    #[error("initialBackoff must be greater than zero")]
    ZeroBackoff,

    #[error("maxBackoff ({max:?}) is smaller than initialBackoff ({initial:?})")]
    BackoffInverted { initial: Duration, max: Duration },

    #[error("backoffMultiplier must be at least 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("malformed retry policy: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors returned by a retried call.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{method} failed after {attempts} attempts: {last}")]
    Exhausted {
        method: String,
        attempts: u32,
        last: Status,
    },

    #[error("{method} failed: {status}")]
    NonRetryable { method: String, status: Status },

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub retryable_conditions: Vec<RetryCondition>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            backoff_multiplier: 2.0,
            retryable_conditions: vec![RetryCondition::Unavailable],
        }
    }
}

impl RetryPolicy {
    /// Parse and validate the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: RetryPolicy = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::NoAttempts);
        }
        if self.initial_backoff.is_zero() {
            return Err(PolicyError::ZeroBackoff);
        }
        if self.max_backoff < self.initial_backoff {
            return Err(PolicyError::BackoffInverted {
                initial: self.initial_backoff,
                max: self.max_backoff,
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }

    pub fn is_retryable(&self, code: Code) -> bool {
        self.retryable_conditions.iter().any(|c| c.matches(code))
    }

    /// Backoff to sleep after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable status, or the
    /// attempt budget is spent.
    ///
    /// With `call_timeout` set, an attempt that does not finish in time fails
    /// with `DEADLINE_EXCEEDED`. The request may still have been applied, so
    /// it is only retried when the policy lists that condition.
    pub async fn retry<T, F, Fut>(
        &self,
        method: &str,
        call_timeout: Option<Duration>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match call_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(Status::deadline_exceeded(format!(
                        "{method} timed out after {limit:?}"
                    ))),
                },
                None => op().await,
            };

            let status = match result {
                Ok(value) => return Ok(value),
                Err(status) => status,
            };

            if !self.is_retryable(status.code()) {
                return Err(RetryError::NonRetryable {
                    method: method.to_string(),
                    status,
                });
            }

            if attempt >= self.max_attempts {
                warn!(method, attempts = attempt, error = %status, "Retries exhausted");
                return Err(RetryError::Exhausted {
                    method: method.to_string(),
                    attempts: attempt,
                    last: status,
                });
            }

            let backoff = self.backoff(attempt);
            debug!(method, attempt, backoff = ?backoff, code = ?status.code(), "Retrying");
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Durations in the protobuf JSON form: `"1s"`, `"0.5s"`, `"250ms"`.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", value.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid duration: {raw:?}")))
    }

    pub fn parse(raw: &str) -> Option<Duration> {
        let raw = raw.trim();
        if let Some(ms) = raw.strip_suffix("ms") {
            return ms.parse::<u64>().ok().map(Duration::from_millis);
        }
        let secs: f64 = raw.strip_suffix('s')?.parse().ok()?;
        (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 40);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(16));
        assert!(policy.is_retryable(Code::Unavailable));
        assert!(!policy.is_retryable(Code::NotFound));
        policy.validate().unwrap();
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let backoffs: Vec<u64> = (1..=7).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(backoffs, vec![1, 2, 4, 8, 16, 16, 16]);
        assert_eq!(policy.backoff(1000), Duration::from_secs(16));
    }

    #[test]
    fn test_policy_json_wire_format() {
        let json = r#"{
            "maxAttempts": 5,
            "initialBackoff": "0.5s",
            "maxBackoff": "2000ms",
            "backoffMultiplier": 1.5,
            "retryableConditions": ["UNAVAILABLE", "DEADLINE_EXCEEDED"]
        }"#;
        let policy = RetryPolicy::from_json(json).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_backoff, Duration::from_secs(2));
        assert!(policy.is_retryable(Code::DeadlineExceeded));

        let encoded = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(encoded["initialBackoff"], "1s");
        assert_eq!(encoded["retryableConditions"][0], "UNAVAILABLE");
    }

    #[test]
    fn test_policy_validation() {
        let inverted = RetryPolicy {
            max_backoff: Duration::from_millis(10),
            ..RetryPolicy::default()
        };
        assert!(matches!(inverted.validate(), Err(PolicyError::BackoffInverted { .. })));

        let none = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(matches!(none.validate(), Err(PolicyError::NoAttempts)));

        assert!(RetryPolicy::from_json(r#"{"maxAttempts": 3}"#).is_err());
        assert!(
            RetryPolicy::from_json(
                r#"{"maxAttempts": 3, "initialBackoff": "soon", "maxBackoff": "1s",
                    "backoffMultiplier": 2.0, "retryableConditions": []}"#
            )
            .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_unavailable_exhausts_default_policy() {
        let policy = RetryPolicy::default();
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&calls);
        let result: Result<(), _> = policy
            .retry("CreateBridgePort", None, || {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().await.push(Instant::now());
                    Err(Status::unavailable("connection refused"))
                }
            })
            .await;

        let calls = calls.lock().await;
        assert_eq!(calls.len(), 40);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] <= Duration::from_secs(16));
        }
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));

        match result {
            Err(RetryError::Exhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 40);
                assert_eq!(last.code(), Code::Unavailable);
                assert!(last.message().contains("connection refused"));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .retry("DeleteBridgePort", None, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Status::not_found("host0-0")) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let value = RetryPolicy::default()
            .retry("CreateBridgePort", None, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(Status::unavailable("not ready"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_is_not_replayed() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .retry("CreateBridgePort", Some(Duration::from_secs(5)), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<Result<(), Status>>()
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::NonRetryable { status, .. }) => {
                assert_eq!(status.code(), Code::DeadlineExceeded);
            }
            other => panic!("expected deadline exceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_retried_when_policy_allows() {
        let policy = RetryPolicy {
            max_attempts: 2,
            retryable_conditions: vec![RetryCondition::DeadlineExceeded],
            ..RetryPolicy::default()
        };
        let result: Result<(), _> = policy
            .retry("DeleteBridgePort", Some(Duration::from_secs(5)), || {
                std::future::pending::<Result<(), Status>>()
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last.code(), Code::DeadlineExceeded);
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }
}
