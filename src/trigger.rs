//! Entry points that turn citizen and operator requests into orchestrations.
//!
//! The service performs the pre-checks the orchestrator relies on (eligibility,
//! already-final cards, duplicate requests) and derives the instance id from
//! the subject and the target status.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::card::{
    CardRecord, CardStatus, CardStore, StatusKind, SubjectId, cgn_eligibility, eyca_eligibility,
};
use crate::error::{RuntimeError, StoreError};
use crate::orchestrator::{CARD_LIFECYCLE, OrchestratorInput, UNBLOCK_SIGNAL, instance_id};
use crate::runtime::{InstanceStatus, OrchestrationClient, StartOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResponse {
    Started { instance_id: String },
    /// The same transition is already being processed.
    InProgress { instance_id: String },
}

impl TriggerResponse {
    pub fn instance_id(&self) -> &str {
        match self {
            TriggerResponse::Started { instance_id } | TriggerResponse::InProgress { instance_id } => {
                instance_id
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("subject is not eligible: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no card found for subject")]
    NotFound,

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Card status together with the state of its activation instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationStatus {
    pub card: CardStatus,
    pub instance: Option<InstanceStatus>,
}

pub struct LifecycleService<C, S> {
    client: Arc<C>,
    cgn_store: Arc<S>,
    eyca_store: Option<Arc<S>>,
    eyca_upper_bound_age: u32,
}

impl<C, S> LifecycleService<C, S>
where
    C: OrchestrationClient,
    S: CardStore,
{
    pub fn new(client: Arc<C>, cgn_store: Arc<S>) -> Self {
        Self {
            client,
            cgn_store,
            eyca_store: None,
            eyca_upper_bound_age: 30,
        }
    }

    /// Also open a pending EYCA card for eligible subjects.
    pub fn with_eyca(mut self, store: Arc<S>, upper_bound_age: u32) -> Self {
        self.eyca_store = Some(store);
        self.eyca_upper_bound_age = upper_bound_age;
        self
    }

    pub async fn start_activation(&self, subject: &SubjectId) -> Result<TriggerResponse, TriggerError> {
        self.start_activation_at(subject, Utc::now()).await
    }

    pub async fn start_activation_at(
        &self,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<TriggerResponse, TriggerError> {
        let today = now.date_naive();
        let eligible = cgn_eligibility(subject, today)
            .map_err(|e| TriggerError::BadRequest(e.to_string()))?
            .ok_or_else(|| TriggerError::Forbidden("age outside the CGN range".into()))?;

        let record = self.cgn_store.find_by_subject(subject).await?;
        if let Some(record) = &record {
            if record.status.is_final() {
                return Err(TriggerError::Conflict(format!(
                    "card is already {}",
                    record.status.kind()
                )));
            }
        }

        let id = instance_id(subject, StatusKind::Activated);
        if let Some(InstanceStatus::Running) = self.client.status(&id).await? {
            return Ok(TriggerResponse::InProgress { instance_id: id });
        }

        if record.is_none() {
            self.cgn_store
                .upsert(CardRecord::new(subject.clone(), CardStatus::Pending))
                .await?;
        }
        self.open_eyca_card(subject, today).await?;

        let input = OrchestratorInput::new(
            subject.clone(),
            CardStatus::Activated {
                activation_date: now,
                expiration_date: eligible.expiration_date.and_time(NaiveTime::MIN).and_utc(),
            },
        );
        self.start(id, &input).await
    }

    async fn open_eyca_card(&self, subject: &SubjectId, today: chrono::NaiveDate) -> Result<(), TriggerError> {
        let Some(store) = &self.eyca_store else {
            return Ok(());
        };
        let eligible = eyca_eligibility(subject, today, self.eyca_upper_bound_age)
            .map_err(|e| TriggerError::BadRequest(e.to_string()))?;
        if eligible.is_some() && store.find_by_subject(subject).await?.is_none() {
            store
                .upsert(CardRecord::new(subject.clone(), CardStatus::Pending))
                .await?;
        }
        Ok(())
    }

    pub async fn revoke(&self, subject: &SubjectId, reason: &str) -> Result<TriggerResponse, TriggerError> {
        if reason.trim().is_empty() {
            return Err(TriggerError::BadRequest("revocation reason is empty".into()));
        }
        let record = self
            .cgn_store
            .find_by_subject(subject)
            .await?
            .ok_or(TriggerError::NotFound)?;
        if matches!(record.status, CardStatus::Revoked { .. } | CardStatus::Expired) {
            return Err(TriggerError::Conflict(format!(
                "card is already {}",
                record.status.kind()
            )));
        }

        let input = OrchestratorInput::new(
            subject.clone(),
            CardStatus::Revoked {
                revocation_reason: reason.to_string(),
                revocation_date: Utc::now(),
            },
        );
        self.start(input.instance_id(), &input).await
    }

    /// Acknowledge the pending transition towards `target`.
    pub async fn unblock(&self, subject: &SubjectId, target: StatusKind) -> Result<(), TriggerError> {
        let id = instance_id(subject, target);
        match self.client.raise_signal(&id, UNBLOCK_SIGNAL).await {
            Ok(()) => Ok(()),
            Err(RuntimeError::InstanceNotFound(_)) => Err(TriggerError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn activation_status(&self, subject: &SubjectId) -> Result<ActivationStatus, TriggerError> {
        let record = self
            .cgn_store
            .find_by_subject(subject)
            .await?
            .ok_or(TriggerError::NotFound)?;
        let instance = self
            .client
            .status(&instance_id(subject, StatusKind::Activated))
            .await?;
        Ok(ActivationStatus {
            card: record.status,
            instance,
        })
    }

    async fn start(&self, id: String, input: &OrchestratorInput) -> Result<TriggerResponse, TriggerError> {
        let payload = serde_json::to_value(input).map_err(RuntimeError::from)?;
        match self.client.start(&id, CARD_LIFECYCLE, payload).await? {
            StartOutcome::Accepted => {
                info!(target_status = %input.new_status.kind(), "lifecycle transition requested");
                Ok(TriggerResponse::Started { instance_id: id })
            }
            StartOutcome::Conflict { existing } => Ok(TriggerResponse::InProgress {
                instance_id: existing,
            }),
        }
    }
}
