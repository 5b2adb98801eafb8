use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Activity, ActivityError, UPDATE_STATUS, decode, success};
use crate::card::{CardStatus, CardStore, SubjectId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusInput {
    pub subject_id: SubjectId,
    pub card: CardStatus,
}

/// Writes the new status on the subject's card record.
///
/// Each attempt reads the record and writes it back with the version it read,
/// so a concurrent writer surfaces as a conflict and the retry starts from a
/// fresh read. A record already carrying the requested status is left alone.
pub struct UpdateStatusActivity<S> {
    store: Arc<S>,
}

impl<S> UpdateStatusActivity<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: CardStore + 'static> Activity for UpdateStatusActivity<S> {
    fn name(&self) -> &'static str {
        UPDATE_STATUS
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value, ActivityError>> {
        Box::pin(async move {
            let input: UpdateStatusInput = decode(input)?;
            let Some(mut record) = self.store.find_by_subject(&input.subject_id).await? else {
                return Err(ActivityError::Unexpected(
                    "no card record for subject".into(),
                ));
            };

            if record.status == input.card {
                return success();
            }
            if !record.status.can_transition_to(&input.card) {
                return Err(ActivityError::BusinessRule(format!(
                    "cannot move a {} card to {}",
                    record.status.kind(),
                    input.card.kind()
                )));
            }

            record.status = input.card;
            self.store.upsert(record).await?;
            success()
        })
    }
}
