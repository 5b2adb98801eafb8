use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Activity, ActivityError, SEND_MESSAGE, decode, success};
use crate::card::SubjectId;
use crate::notification::{MessageContent, Notifier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageInput {
    pub subject_id: SubjectId,
    pub content: MessageContent,
}

/// Delivers a message to the citizen.
pub struct SendMessageActivity<N> {
    notifier: Arc<N>,
}

impl<N> SendMessageActivity<N> {
    pub fn new(notifier: Arc<N>) -> Self {
        Self { notifier }
    }
}

impl<N: Notifier + 'static> Activity for SendMessageActivity<N> {
    fn name(&self) -> &'static str {
        SEND_MESSAGE
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value, ActivityError>> {
        Box::pin(async move {
            let input: SendMessageInput = decode(input)?;
            self.notifier.send(&input.subject_id, &input.content).await?;
            success()
        })
    }
}
