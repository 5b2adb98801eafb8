use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::card::{CardStatus, StatusKind, SubjectId};

#[derive(Debug, Error)]
#[error("notification rejected: {0}")]
pub struct NotifyError(pub String);

/// A message delivered to the citizen's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub subject: String,
    pub markdown: String,
}

impl MessageContent {
    /// Sent when a lifecycle transition could not be completed.
    pub fn transition_failed(target: StatusKind) -> Self {
        let what = match target {
            StatusKind::Activated => "activation",
            StatusKind::Revoked => "revocation",
            StatusKind::Expired => "expiration",
            StatusKind::Pending => "request",
        };
        Self {
            subject: format!("Your card {what} could not be completed"),
            markdown: format!(
                "We were unable to complete the {what} of your benefit card. \
                 Please submit the request again later."
            ),
        }
    }

    /// Sent when a transition succeeded and the citizen did not acknowledge it.
    pub fn status_changed(status: &CardStatus) -> Self {
        let markdown = match status {
            CardStatus::Pending => "Your benefit card request has been received.".to_string(),
            CardStatus::Activated {
                expiration_date, ..
            } => format!(
                "Your benefit card is now active. It is valid until {}.",
                expiration_date.format("%d/%m/%Y")
            ),
            CardStatus::Revoked {
                revocation_reason, ..
            } => format!("Your benefit card has been revoked: {revocation_reason}."),
            CardStatus::Expired => "Your benefit card has expired.".to_string(),
        };
        Self {
            subject: "Your benefit card status changed".to_string(),
            markdown,
        }
    }
}

/// Citizen notification service.
pub trait Notifier: Send + Sync {
    fn send(
        &self,
        subject: &SubjectId,
        content: &MessageContent,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Emits each message as a log record instead of delivering it.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, _subject: &SubjectId, content: &MessageContent) -> Result<(), NotifyError> {
        tracing::info!(subject = %content.subject, "message sent");
        Ok(())
    }
}

/// Keeps every message in memory; used by the demo and tests.
#[derive(Debug, Default)]
pub struct OutboxNotifier {
    sent: Mutex<Vec<(SubjectId, MessageContent)>>,
}

impl OutboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(SubjectId, MessageContent)> {
        self.sent.lock().expect("outbox lock poisoned").clone()
    }
}

impl Notifier for OutboxNotifier {
    async fn send(&self, subject: &SubjectId, content: &MessageContent) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("outbox lock poisoned")
            .push((subject.clone(), content.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn activation_message_includes_expiration_date() {
        let status = CardStatus::Activated {
            activation_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            expiration_date: Utc.with_ymd_and_hms(2030, 3, 15, 0, 0, 0).unwrap(),
        };
        let msg = MessageContent::status_changed(&status);
        assert!(msg.markdown.contains("15/03/2030"));
    }

    #[test]
    fn failure_message_names_the_transition() {
        let msg = MessageContent::transition_failed(StatusKind::Revoked);
        assert!(msg.subject.contains("revocation"));
    }

    #[tokio::test]
    async fn outbox_records_messages() {
        let outbox = OutboxNotifier::new();
        let subject = SubjectId::new("RSSMRA85T10A562S");
        outbox
            .send(&subject, &MessageContent::status_changed(&CardStatus::Expired))
            .await
            .unwrap();
        let sent = outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, subject);
    }
}
