use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque citizen identifier (the fiscal code in production).
///
/// `Debug` never prints the value so identifiers cannot leak into logs through
/// `{:?}` formatting. Use [`SubjectId::as_str`] where the raw value is needed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubjectId(<redacted>)")
    }
}

/// Discriminant of [`CardStatus`], used to key orchestration instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Pending,
    Activated,
    Revoked,
    Expired,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Pending => "PENDING",
            StatusKind::Activated => "ACTIVATED",
            StatusKind::Revoked => "REVOKED",
            StatusKind::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status of a benefit card. Exactly one variant is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Pending,
    Activated {
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
    },
    Revoked {
        revocation_reason: String,
        revocation_date: DateTime<Utc>,
    },
    Expired,
}

impl CardStatus {
    pub fn kind(&self) -> StatusKind {
        match self {
            CardStatus::Pending => StatusKind::Pending,
            CardStatus::Activated { .. } => StatusKind::Activated,
            CardStatus::Revoked { .. } => StatusKind::Revoked,
            CardStatus::Expired => StatusKind::Expired,
        }
    }

    /// A card in a final state cannot be activated again.
    pub fn is_final(&self) -> bool {
        match self {
            CardStatus::Pending => false,
            CardStatus::Activated { .. } | CardStatus::Revoked { .. } | CardStatus::Expired => true,
        }
    }

    /// Whether moving from `self` to `target` is a legal lifecycle transition.
    ///
    /// `Pending -> Activated`, and `Pending | Activated -> Revoked | Expired`.
    /// Revoked and expired cards never move again.
    pub fn can_transition_to(&self, target: &CardStatus) -> bool {
        match (self, target) {
            (CardStatus::Pending, CardStatus::Activated { .. }) => true,
            (
                CardStatus::Pending | CardStatus::Activated { .. },
                CardStatus::Revoked { .. } | CardStatus::Expired,
            ) => true,
            (CardStatus::Pending, CardStatus::Pending) => false,
            (CardStatus::Activated { .. }, CardStatus::Pending | CardStatus::Activated { .. }) => {
                false
            }
            (CardStatus::Revoked { .. } | CardStatus::Expired, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn activated() -> CardStatus {
        let now = Utc::now();
        CardStatus::Activated {
            activation_date: now,
            expiration_date: now + Duration::days(365),
        }
    }

    fn revoked() -> CardStatus {
        CardStatus::Revoked {
            revocation_reason: "fraud".into(),
            revocation_date: Utc::now(),
        }
    }

    #[test]
    fn subject_debug_is_redacted() {
        let subject = SubjectId::new("RSSMRA85T10A562S");
        assert_eq!(format!("{subject:?}"), "SubjectId(<redacted>)");
        assert_eq!(subject.as_str(), "RSSMRA85T10A562S");
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(&CardStatus::Pending).unwrap();
        assert_eq!(json, serde_json::json!({"status": "PENDING"}));

        let json = serde_json::to_value(revoked()).unwrap();
        assert_eq!(json["status"], "REVOKED");
        assert_eq!(json["revocation_reason"], "fraud");
    }

    #[test]
    fn activated_status_deserializes_from_wire_format() {
        let status: CardStatus = serde_json::from_str(
            r#"{"status":"ACTIVATED","activation_date":"2024-01-01T00:00:00Z","expiration_date":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(status.kind(), StatusKind::Activated);
    }

    #[test]
    fn final_states() {
        assert!(!CardStatus::Pending.is_final());
        assert!(activated().is_final());
        assert!(revoked().is_final());
        assert!(CardStatus::Expired.is_final());
    }

    #[test]
    fn legal_transitions() {
        assert!(CardStatus::Pending.can_transition_to(&activated()));
        assert!(CardStatus::Pending.can_transition_to(&revoked()));
        assert!(activated().can_transition_to(&revoked()));
        assert!(activated().can_transition_to(&CardStatus::Expired));
    }

    #[test]
    fn revoked_and_expired_are_absorbing() {
        assert!(!revoked().can_transition_to(&CardStatus::Expired));
        assert!(!revoked().can_transition_to(&activated()));
        assert!(!CardStatus::Expired.can_transition_to(&revoked()));
        assert!(!activated().can_transition_to(&CardStatus::Pending));
    }

    #[test]
    fn kind_display() {
        assert_eq!(StatusKind::Activated.to_string(), "ACTIVATED");
        assert_eq!(revoked().kind(), StatusKind::Revoked);
    }
}
