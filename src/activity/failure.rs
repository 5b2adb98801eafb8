use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StoreError;
use crate::eyca::EycaError;
use crate::notification::NotifyError;

/// Classifies an activity failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Invalid input or a violated business rule. Never retried.
    Permanent,
    /// Infrastructure failure (network, storage conflict, timeout). Safe to retry.
    Transient,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Permanent => write!(f, "Permanent"),
            FailureKind::Transient => write!(f, "Transient"),
        }
    }
}

/// A classified failure with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.reason)
    }
}

/// Raw errors surfaced by activity handlers.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("cannot decode activity input: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid activity input: {0}")]
    Invalid(String),

    #[error("business rule violated: {0}")]
    BusinessRule(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("EYCA API error: {0}")]
    Issuer(#[from] EycaError),

    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("activity timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Decide whether an activity error may be retried. Pure, no I/O.
pub fn classify(err: &ActivityError) -> FailureKind {
    match err {
        ActivityError::Decode(_) | ActivityError::Invalid(_) | ActivityError::BusinessRule(_) => {
            FailureKind::Permanent
        }
        ActivityError::Store(_)
        | ActivityError::Issuer(_)
        | ActivityError::Notify(_)
        | ActivityError::Timeout(_)
        | ActivityError::Unexpected(_) => FailureKind::Transient,
    }
}

impl From<ActivityError> for Failure {
    fn from(err: ActivityError) -> Self {
        Failure {
            kind: classify(&err),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_failures_are_permanent() {
        let inputs = [
            serde_json::json!({}),
            serde_json::json!({"subject_id": 42}),
            serde_json::json!("not an object"),
            serde_json::json!(null),
        ];
        for input in inputs {
            let err = serde_json::from_value::<crate::expiration::ExpiredCardRow>(input).unwrap_err();
            assert_eq!(classify(&ActivityError::from(err)), FailureKind::Permanent);
        }
        assert_eq!(
            classify(&ActivityError::Invalid("empty subject".into())),
            FailureKind::Permanent
        );
        assert_eq!(
            classify(&ActivityError::BusinessRule("card already revoked".into())),
            FailureKind::Permanent
        );
    }

    #[test]
    fn network_and_timeouts_are_transient() {
        assert_eq!(
            classify(&ActivityError::Timeout(Duration::from_secs(60))),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&ActivityError::Issuer(EycaError::Timeout)),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&ActivityError::Store(StoreError::Conflict {
                expected: None,
                found: Some("v1".into()),
            })),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&ActivityError::Unexpected("boom".into())),
            FailureKind::Transient
        );
    }

    #[test]
    fn failure_display() {
        let biz = Failure::permanent("card already revoked");
        assert_eq!(biz.to_string(), "Permanent failure: card already revoked");

        let sys = Failure::transient("API timeout");
        assert_eq!(sys.to_string(), "Transient failure: API timeout");
    }

    #[test]
    fn conversion_keeps_reason() {
        let failure: Failure = ActivityError::Invalid("empty subject".into()).into();
        assert!(failure.is_permanent());
        assert_eq!(failure.reason, "invalid activity input: empty subject");
    }
}
