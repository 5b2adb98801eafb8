use std::sync::Arc;

use chrono::{NaiveTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{ACTIVATE_EYCA, Activity, ActivityError, decode, success};
use crate::card::{CardStatus, CardStore, SubjectId, eyca_eligibility};
use crate::eyca::CardIssuer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EycaActivationInput {
    pub subject_id: SubjectId,
}

/// Activates the companion EYCA card once the main card is active.
///
/// The card code is stored on the EYCA record before the expiration date is
/// registered with the issuer, so a retry after a failed registration reuses
/// the code instead of pre-issuing a new one.
pub struct EycaActivationActivity<S, I> {
    store: Arc<S>,
    issuer: Arc<I>,
    upper_bound_age: u32,
}

impl<S, I> EycaActivationActivity<S, I> {
    pub fn new(store: Arc<S>, issuer: Arc<I>, upper_bound_age: u32) -> Self {
        Self {
            store,
            issuer,
            upper_bound_age,
        }
    }
}

impl<S, I> Activity for EycaActivationActivity<S, I>
where
    S: CardStore + 'static,
    I: CardIssuer + 'static,
{
    fn name(&self) -> &'static str {
        ACTIVATE_EYCA
    }

    fn run(&self, input: Value) -> BoxFuture<'_, Result<Value, ActivityError>> {
        Box::pin(async move {
            let input: EycaActivationInput = decode(input)?;
            // Subjects outside the EYCA age range never get an EYCA record.
            let Some(mut record) = self.store.find_by_subject(&input.subject_id).await? else {
                debug!("no EYCA card for subject, skipping");
                return success();
            };

            match (&record.status, &record.card_number) {
                (CardStatus::Pending, _) => {}
                (CardStatus::Activated { expiration_date, .. }, Some(code)) => {
                    self.issuer
                        .update_card(code, expiration_date.date_naive())
                        .await?;
                    return success();
                }
                (status, _) => {
                    return Err(ActivityError::BusinessRule(format!(
                        "cannot activate a {} EYCA card",
                        status.kind()
                    )));
                }
            }

            let now = Utc::now();
            let eligible = eyca_eligibility(&input.subject_id, now.date_naive(), self.upper_bound_age)
                .map_err(|e| ActivityError::Invalid(e.to_string()))?
                .ok_or_else(|| ActivityError::BusinessRule("subject is not EYCA eligible".into()))?;

            let code = self.issuer.pre_issue_code().await?;
            record.status = CardStatus::Activated {
                activation_date: now,
                expiration_date: eligible.expiration_date.and_time(NaiveTime::MIN).and_utc(),
            };
            record.card_number = Some(code.clone());
            self.store.upsert(record).await?;

            self.issuer.update_card(&code, eligible.expiration_date).await?;
            info!("EYCA card activated");
            success()
        })
    }
}
