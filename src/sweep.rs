//! Periodic expiration sweep.
//!
//! Every row of the expiration table past its date is handled on its own: the
//! activation instance for the subject is cancelled, then an expiration
//! orchestration is started. A row whose cancellation fails is skipped and
//! reported without holding up the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityResult;
use crate::card::{CardStatus, StatusKind, SubjectId};
use crate::error::StoreError;
use crate::expiration::{ExpirationStore, ExpiredCardRow};
use crate::orchestrator::{CARD_LIFECYCLE, OrchestratorInput, instance_id};
use crate::runtime::{CancelOutcome, InstanceStatus, OrchestrationClient, StartOutcome};

const CANCEL_REASON: &str = "card expired";

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("cannot read expiration table: {0}")]
    Store(#[from] StoreError),
}

/// What happened to each expired row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub started: Vec<SubjectId>,
    pub in_progress: Vec<SubjectId>,
    /// Expiration already completed earlier; the row was dropped.
    pub already_expired: Vec<SubjectId>,
    pub failed: Vec<(SubjectId, String)>,
}

impl SweepReport {
    /// Rows that now have an expiration orchestration behind them.
    pub fn transitioned(&self) -> usize {
        self.started.len() + self.in_progress.len()
    }
}

enum RowOutcome {
    Started,
    InProgress,
    AlreadyExpired,
}

pub struct ExpirationSweep<C, E> {
    client: Arc<C>,
    expirations: Arc<E>,
}

impl<C, E> ExpirationSweep<C, E>
where
    C: OrchestrationClient,
    E: ExpirationStore,
{
    pub fn new(client: Arc<C>, expirations: Arc<E>) -> Self {
        Self {
            client,
            expirations,
        }
    }

    /// Process every row expired at `now`, all rows concurrently.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let rows = self.expirations.expired_before(now).await?;
        info!(rows = rows.len(), "expiration sweep started");

        let outcomes = join_all(rows.into_iter().map(|row| self.process(row))).await;

        let mut report = SweepReport::default();
        for (subject, outcome) in outcomes {
            match outcome {
                Ok(RowOutcome::Started) => report.started.push(subject),
                Ok(RowOutcome::InProgress) => report.in_progress.push(subject),
                Ok(RowOutcome::AlreadyExpired) => report.already_expired.push(subject),
                Err(reason) => report.failed.push((subject, reason)),
            }
        }
        info!(
            started = report.started.len(),
            in_progress = report.in_progress.len(),
            already_expired = report.already_expired.len(),
            failed = report.failed.len(),
            "expiration sweep finished"
        );
        Ok(report)
    }

    async fn process(&self, row: ExpiredCardRow) -> (SubjectId, Result<RowOutcome, String>) {
        let subject = row.subject_id;
        let outcome = self.expire(&subject).await;
        (subject, outcome)
    }

    async fn expire(&self, subject: &SubjectId) -> Result<RowOutcome, String> {
        let input = OrchestratorInput::new(subject.clone(), CardStatus::Expired);
        let expired_id = input.instance_id();

        match self.client.status(&expired_id).await {
            Ok(Some(InstanceStatus::Completed(ActivityResult::Success))) => {
                if let Err(err) = self.expirations.remove(subject).await {
                    warn!(error = %err, "cannot drop expiration row");
                }
                return Ok(RowOutcome::AlreadyExpired);
            }
            Ok(_) => {}
            // Start still refuses a duplicate, so the row proceeds.
            Err(err) => warn!(error = %err, "cannot read expiration status, proceeding"),
        }

        let activation_id = instance_id(subject, StatusKind::Activated);
        match self.client.cancel(&activation_id, CANCEL_REASON).await {
            Ok(CancelOutcome::Cancelled) => debug!("in-flight activation cancelled"),
            Ok(CancelOutcome::NotFound | CancelOutcome::AlreadyTerminal) => {}
            Err(err) => {
                warn!(error = %err, "cannot cancel activation, row skipped");
                return Err(err.to_string());
            }
        }

        let payload = serde_json::to_value(&input).map_err(|e| e.to_string())?;
        match self.client.start(&expired_id, CARD_LIFECYCLE, payload).await {
            Ok(StartOutcome::Accepted) => Ok(RowOutcome::Started),
            Ok(StartOutcome::Conflict { .. }) => Ok(RowOutcome::InProgress),
            Err(err) => {
                warn!(error = %err, "cannot start expiration");
                Err(err.to_string())
            }
        }
    }

    /// Sweep every `interval` until `cancel` fires. The first sweep runs at once.
    pub async fn run_periodically(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run(Utc::now()).await {
                        error!(error = %err, "expiration sweep failed");
                    }
                }
            }
        }
        debug!("expiration sweep stopped");
    }
}
