//! Activities: named, independently retryable side-effecting operations.
//!
//! Every activity takes a JSON payload, decodes it into its own input type and
//! reports either a JSON output or an [`ActivityError`]. The
//! [`ActivityInvoker`] runs them under a [`RetryPolicy`] and classifies their
//! errors into [`Failure`]s.

mod eyca_activation;
mod failure;
mod invoker;
mod send_message;
mod store_expiration;
mod update_status;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use eyca_activation::{EycaActivationActivity, EycaActivationInput};
pub use failure::{ActivityError, Failure, FailureKind, classify};
pub use invoker::{ActivityInvoker, RetryPolicy};
pub use send_message::{SendMessageActivity, SendMessageInput};
pub use store_expiration::StoreExpirationActivity;
pub use update_status::{UpdateStatusActivity, UpdateStatusInput};

pub const STORE_EXPIRATION: &str = "StoreCgnExpirationActivity";
pub const UPDATE_STATUS: &str = "UpdateCgnStatusActivity";
pub const SEND_MESSAGE: &str = "SendMessageActivity";
pub const ACTIVATE_EYCA: &str = "SuccessEycaActivationActivity";

/// Outcome of an activity or of a whole orchestration, as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityResult {
    Success,
    Failure { reason: String },
}

impl ActivityResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActivityResult::Success)
    }
}

impl From<&Failure> for ActivityResult {
    fn from(failure: &Failure) -> Self {
        ActivityResult::Failure {
            reason: failure.reason.clone(),
        }
    }
}

pub trait Activity: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value, ActivityError>>;
}

/// Activities available to the runtime, by name.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<&'static str, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, activity: impl Activity + 'static) -> &mut Self {
        self.activities.insert(activity.name(), Arc::new(activity));
        self
    }

    pub fn with(mut self, activity: impl Activity + 'static) -> Self {
        self.register(activity);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }
}

pub(crate) fn decode<T: DeserializeOwned>(input: Value) -> Result<T, ActivityError> {
    Ok(serde_json::from_value(input)?)
}

pub(crate) fn success() -> Result<Value, ActivityError> {
    Ok(serde_json::to_value(ActivityResult::Success)?)
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedActivity;
    use super::*;

    #[test]
    fn activity_result_wire_format() {
        let json = serde_json::to_value(ActivityResult::Success).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "SUCCESS"}));

        let json = serde_json::to_value(ActivityResult::Failure {
            reason: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "FAILURE", "reason": "boom"}));
    }

    #[test]
    fn registry_looks_up_by_name() {
        let registry = ActivityRegistry::new().with(ScriptedActivity::succeeding(SEND_MESSAGE));
        assert!(registry.get(UPDATE_STATUS).is_none());
        assert_eq!(registry.get(SEND_MESSAGE).unwrap().name(), SEND_MESSAGE);
    }
}
