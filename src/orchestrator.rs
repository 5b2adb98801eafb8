use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::activity::{
    ActivityError, ActivityResult, Failure, SEND_MESSAGE, STORE_EXPIRATION, SendMessageInput,
    UPDATE_STATUS, UpdateStatusInput,
};
use crate::card::{CardStatus, StatusKind, SubjectId};
use crate::expiration::ExpiredCardRow;
use crate::notification::MessageContent;
use crate::runtime::{Orchestration, OrchestrationContext, OrchestrationError};
use crate::state_machine::{LifecycleRun, RunSummary, StateMachine, Step, StepOutcome, Transition};

pub const CARD_LIFECYCLE: &str = "CardLifecycleOrchestrator";
pub const UNBLOCK_SIGNAL: &str = "unblock";

/// What a lifecycle orchestration is asked to do. Fixed for the life of the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorInput {
    pub subject_id: SubjectId,
    pub new_status: CardStatus,
}

impl OrchestratorInput {
    pub fn new(subject_id: SubjectId, new_status: CardStatus) -> Self {
        Self {
            subject_id,
            new_status,
        }
    }

    pub fn instance_id(&self) -> String {
        instance_id(&self.subject_id, self.new_status.kind())
    }

    pub fn validate(&self) -> Result<(), ActivityError> {
        if self.subject_id.as_str().trim().is_empty() {
            return Err(ActivityError::Invalid("subject id is empty".into()));
        }
        match &self.new_status {
            CardStatus::Activated {
                activation_date,
                expiration_date,
            } if expiration_date <= activation_date => Err(ActivityError::Invalid(
                "expiration date must follow activation date".into(),
            )),
            CardStatus::Revoked {
                revocation_reason, ..
            } if revocation_reason.trim().is_empty() => {
                Err(ActivityError::Invalid("revocation reason is empty".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Deterministic instance id for a `(subject, target status)` pair.
pub fn instance_id(subject: &SubjectId, target: StatusKind) -> String {
    format!(
        "cgn-{}-{}",
        target.as_str().to_ascii_lowercase(),
        subject.as_str()
    )
}

/// Optional activities run around the status update of an activation.
#[derive(Debug, Clone, Default)]
pub struct ActivationHooks {
    pub pre: Option<&'static str>,
    pub post: Option<&'static str>,
}

/// Drives a card through one lifecycle transition.
pub struct CardLifecycleOrchestrator {
    ack_timeout: Duration,
    hooks: ActivationHooks,
}

impl CardLifecycleOrchestrator {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            hooks: ActivationHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: ActivationHooks) -> Self {
        self.hooks = hooks;
        self
    }

    async fn execute(
        &self,
        ctx: &mut OrchestrationContext,
        raw: Value,
    ) -> Result<ActivityResult, OrchestrationError> {
        let mut run = LifecycleRun::new();

        let input = match decode_input(raw) {
            Ok(input) => {
                run.target = Some(input.new_status.kind());
                StateMachine::next(&mut run, StepOutcome::Success);
                input
            }
            Err(failure) => {
                warn!(kind = %failure.kind, reason = %failure.reason, "rejected orchestration input");
                let transition = StateMachine::next(&mut run, StepOutcome::Failure(failure));
                return Ok(finish(&run, transition));
            }
        };

        loop {
            let outcome = match run.step {
                Step::PreActivationHook => self.hook(ctx, self.hooks.pre, &input).await?,
                Step::PersistExpiration => persist_expiration(ctx, &input).await?,
                Step::UpdateStatus => {
                    let payload = UpdateStatusInput {
                        subject_id: input.subject_id.clone(),
                        card: input.new_status.clone(),
                    };
                    call(ctx, UPDATE_STATUS, &payload).await?
                }
                Step::PostActivationHook => self.hook(ctx, self.hooks.post, &input).await?,
                Step::AwaitAckOrNotify => self.await_ack_or_notify(ctx, &input).await?,
                Step::Compensating => compensate(ctx, &input).await?,
                Step::Decoding | Step::End => StepOutcome::Success,
            };

            match StateMachine::next(&mut run, outcome) {
                Transition::Next(step) => debug!(%step, "lifecycle step"),
                Transition::Compensate(failure) => {
                    warn!(kind = %failure.kind, reason = %failure.reason, "lifecycle step failed, notifying subject");
                }
                complete @ Transition::Complete(_) => return Ok(finish(&run, complete)),
            }
        }
    }

    async fn hook(
        &self,
        ctx: &mut OrchestrationContext,
        hook: Option<&'static str>,
        input: &OrchestratorInput,
    ) -> Result<StepOutcome, OrchestrationError> {
        let Some(name) = hook else {
            return Ok(StepOutcome::Success);
        };
        match expiration_row(input) {
            Some(row) => call(ctx, name, &row).await,
            None => Ok(StepOutcome::Success),
        }
    }

    async fn await_ack_or_notify(
        &self,
        ctx: &mut OrchestrationContext,
        input: &OrchestratorInput,
    ) -> Result<StepOutcome, OrchestrationError> {
        if ctx.wait_for_signal(UNBLOCK_SIGNAL, self.ack_timeout).await? {
            debug!("transition acknowledged");
            return Ok(StepOutcome::Success);
        }
        let message = SendMessageInput {
            subject_id: input.subject_id.clone(),
            content: MessageContent::status_changed(&input.new_status),
        };
        if let StepOutcome::Failure(failure) = call(ctx, SEND_MESSAGE, &message).await? {
            warn!(kind = %failure.kind, reason = %failure.reason, "status notification failed");
        }
        Ok(StepOutcome::Success)
    }
}

impl Orchestration for CardLifecycleOrchestrator {
    fn name(&self) -> &'static str {
        CARD_LIFECYCLE
    }

    fn run<'a>(
        &'a self,
        ctx: &'a mut OrchestrationContext,
        input: Value,
    ) -> BoxFuture<'a, Result<ActivityResult, OrchestrationError>> {
        Box::pin(self.execute(ctx, input))
    }
}

fn decode_input(raw: Value) -> Result<OrchestratorInput, Failure> {
    let input: OrchestratorInput = serde_json::from_value(raw).map_err(ActivityError::from)?;
    input.validate()?;
    Ok(input)
}

fn expiration_row(input: &OrchestratorInput) -> Option<ExpiredCardRow> {
    match input.new_status {
        CardStatus::Activated {
            activation_date,
            expiration_date,
        } => Some(ExpiredCardRow {
            subject_id: input.subject_id.clone(),
            activation_date,
            expiration_date,
        }),
        _ => None,
    }
}

fn finish(run: &LifecycleRun, transition: Transition) -> ActivityResult {
    let result = match transition {
        Transition::Complete(result) => result,
        Transition::Next(_) | Transition::Compensate(_) => ActivityResult::Failure {
            reason: "lifecycle run stopped before completing".into(),
        },
    };
    let summary = RunSummary::from_run(run);
    info!(
        target_status = ?summary.target,
        path = %summary.path(),
        success = summary.success,
        "lifecycle run finished"
    );
    result
}

/// Call an activity, turning its failure into a step outcome.
///
/// Cancellation and history errors still abort the orchestration.
async fn call<T: Serialize>(
    ctx: &mut OrchestrationContext,
    activity: &str,
    payload: &T,
) -> Result<StepOutcome, OrchestrationError> {
    let payload = match serde_json::to_value(payload) {
        Ok(payload) => payload,
        Err(err) => return Ok(StepOutcome::Failure(ActivityError::from(err).into())),
    };
    match ctx.call_activity(activity, payload).await {
        Ok(_) => Ok(StepOutcome::Success),
        Err(OrchestrationError::Failed(failure)) => Ok(StepOutcome::Failure(failure)),
        Err(err) => Err(err),
    }
}

async fn persist_expiration(
    ctx: &mut OrchestrationContext,
    input: &OrchestratorInput,
) -> Result<StepOutcome, OrchestrationError> {
    match expiration_row(input) {
        Some(row) => call(ctx, STORE_EXPIRATION, &row).await,
        None => Ok(StepOutcome::Success),
    }
}

/// Best-effort failure notice. Its own outcome is only logged.
async fn compensate(
    ctx: &mut OrchestrationContext,
    input: &OrchestratorInput,
) -> Result<StepOutcome, OrchestrationError> {
    let message = SendMessageInput {
        subject_id: input.subject_id.clone(),
        content: MessageContent::transition_failed(input.new_status.kind()),
    };
    let outcome = call(ctx, SEND_MESSAGE, &message).await?;
    if let StepOutcome::Failure(failure) = &outcome {
        warn!(kind = %failure.kind, reason = %failure.reason, "failure notification not delivered");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::testing::{Probe, ScriptedActivity};
    use crate::activity::{ACTIVATE_EYCA, ActivityInvoker, ActivityRegistry, FailureKind};
    use crate::runtime::{
        HistoryEvent, HistoryStore, InstanceStatus, MemoryHistoryStore, Runtime, StartOutcome,
        Terminal,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct Harness {
        runtime: Runtime,
        store: Arc<dyn HistoryStore>,
        journal: Journal,
        persist: Probe,
        update: Probe,
        message: Probe,
        eyca: Probe,
    }

    struct Activities {
        update: ScriptedActivity,
        message: ScriptedActivity,
    }

    impl Default for Activities {
        fn default() -> Self {
            Self {
                update: ScriptedActivity::succeeding(UPDATE_STATUS),
                message: ScriptedActivity::succeeding(SEND_MESSAGE),
            }
        }
    }

    fn harness_with(
        store: Arc<dyn HistoryStore>,
        activities: Activities,
        hooks: ActivationHooks,
    ) -> Harness {
        let journal: Journal = Arc::default();
        let persist = ScriptedActivity::succeeding(STORE_EXPIRATION).with_journal(journal.clone());
        let update = activities.update.with_journal(journal.clone());
        let message = activities.message.with_journal(journal.clone());
        let eyca = ScriptedActivity::succeeding(ACTIVATE_EYCA).with_journal(journal.clone());
        let probes = (persist.probe(), update.probe(), message.probe(), eyca.probe());

        let registry = ActivityRegistry::new()
            .with(persist)
            .with(update)
            .with(message)
            .with(eyca);
        let runtime = Runtime::builder(store.clone(), ActivityInvoker::new(registry))
            .orchestration(CardLifecycleOrchestrator::new(Duration::from_secs(60)).with_hooks(hooks))
            .build();

        Harness {
            runtime,
            store,
            journal,
            persist: probes.0,
            update: probes.1,
            message: probes.2,
            eyca: probes.3,
        }
    }

    fn harness(activities: Activities) -> Harness {
        harness_with(
            Arc::new(MemoryHistoryStore::new()),
            activities,
            ActivationHooks::default(),
        )
    }

    fn subject() -> SubjectId {
        SubjectId::new("BNCLRA01A41H501X")
    }

    fn activation() -> OrchestratorInput {
        let now = Utc::now();
        OrchestratorInput::new(
            subject(),
            CardStatus::Activated {
                activation_date: now,
                expiration_date: now + ChronoDuration::days(365),
            },
        )
    }

    fn revocation() -> OrchestratorInput {
        OrchestratorInput::new(
            subject(),
            CardStatus::Revoked {
                revocation_reason: "fraud".into(),
                revocation_date: Utc::now(),
            },
        )
    }

    async fn run_to_end(h: &Harness, input: &OrchestratorInput) -> Terminal {
        let id = input.instance_id();
        let outcome = h
            .runtime
            .start(&id, CARD_LIFECYCLE, serde_json::to_value(input).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Accepted);
        h.runtime.wait_for_completion(&id).await.unwrap()
    }

    fn success() -> Terminal {
        Terminal::Completed {
            result: ActivityResult::Success,
        }
    }

    #[test]
    fn instance_id_is_derived_from_subject_and_target() {
        assert_eq!(
            activation().instance_id(),
            "cgn-activated-BNCLRA01A41H501X"
        );
        assert_eq!(
            instance_id(&subject(), StatusKind::Expired),
            "cgn-expired-BNCLRA01A41H501X"
        );
    }

    #[test]
    fn validation_rejects_inconsistent_input() {
        let now = Utc::now();
        let inverted = OrchestratorInput::new(
            subject(),
            CardStatus::Activated {
                activation_date: now,
                expiration_date: now - ChronoDuration::days(1),
            },
        );
        assert!(inverted.validate().is_err());

        let no_reason = OrchestratorInput::new(
            subject(),
            CardStatus::Revoked {
                revocation_reason: " ".into(),
                revocation_date: now,
            },
        );
        assert!(no_reason.validate().is_err());

        let no_subject = OrchestratorInput::new(SubjectId::new(""), CardStatus::Expired);
        assert!(no_subject.validate().is_err());
        assert!(revocation().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn non_activation_targets_never_persist_expiration() {
        let h = harness(Activities::default());
        let inputs = [
            revocation(),
            OrchestratorInput::new(subject(), CardStatus::Expired),
        ];
        for input in &inputs {
            assert_eq!(run_to_end(&h, input).await, success());
        }
        assert_eq!(h.persist.calls(), 0);
        assert_eq!(h.update.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn activation_persists_expiration_once_before_update() {
        let h = harness(Activities::default());
        let input = activation();

        assert_eq!(run_to_end(&h, &input).await, success());

        // No ack arrived, so the status notification closes the run.
        assert_eq!(
            *h.journal.lock().unwrap(),
            vec![STORE_EXPIRATION, UPDATE_STATUS, SEND_MESSAGE]
        );
        let row: ExpiredCardRow = serde_json::from_value(h.persist.inputs()[0].clone()).unwrap();
        assert_eq!(Some(row), expiration_row(&input));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_reports_conflict() {
        let h = harness(Activities::default());
        let input = revocation();
        let id = input.instance_id();
        let payload = serde_json::to_value(&input).unwrap();

        assert_eq!(
            h.runtime.start(&id, CARD_LIFECYCLE, payload.clone()).await.unwrap(),
            StartOutcome::Accepted
        );
        assert_eq!(
            h.runtime.start(&id, CARD_LIFECYCLE, payload).await.unwrap(),
            StartOutcome::Conflict { existing: id.clone() }
        );
        h.runtime.wait_for_completion(&id).await.unwrap();
        assert_eq!(h.update.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_notification_never_masks_original_failure() {
        let h = harness(Activities {
            update: ScriptedActivity::failing(UPDATE_STATUS, || {
                ActivityError::Unexpected("store down".into())
            }),
            message: ScriptedActivity::failing(SEND_MESSAGE, || {
                ActivityError::Unexpected("notifier down".into())
            }),
        });
        let input = revocation();

        let terminal = run_to_end(&h, &input).await;

        let history = h.store.load(&input.instance_id()).await.unwrap();
        let update_failure = history
            .iter()
            .find_map(|e| match e {
                HistoryEvent::ActivityFailed { failure, .. } if failure.reason.contains("store down") => {
                    Some(failure.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(update_failure.kind, FailureKind::Transient);
        assert_eq!(
            terminal,
            Terminal::Completed {
                result: ActivityResult::Failure {
                    reason: update_failure.reason
                }
            }
        );
        // Retries exhausted on both, compensation attempted.
        assert_eq!(h.update.calls(), 3);
        assert_eq!(h.message.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_compensates_without_retry() {
        let h = harness(Activities {
            update: ScriptedActivity::failing(UPDATE_STATUS, || {
                ActivityError::BusinessRule("card already final".into())
            }),
            ..Default::default()
        });

        let terminal = run_to_end(&h, &revocation()).await;

        assert_eq!(
            terminal,
            Terminal::Completed {
                result: ActivityResult::Failure {
                    reason: "business rule violated: card already final".into()
                }
            }
        );
        assert_eq!(h.update.calls(), 1);
        assert_eq!(h.message.calls(), 1);
        let sent: SendMessageInput = serde_json::from_value(h.message.inputs()[0].clone()).unwrap();
        assert_eq!(sent.content, MessageContent::transition_failed(StatusKind::Revoked));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_input_fails_without_side_effects() {
        let h = harness(Activities::default());
        h.runtime
            .start("bad", CARD_LIFECYCLE, serde_json::json!({"subject_id": 1}))
            .await
            .unwrap();

        let terminal = h.runtime.wait_for_completion("bad").await.unwrap();

        assert!(matches!(
            terminal,
            Terminal::Completed {
                result: ActivityResult::Failure { .. }
            }
        ));
        assert!(h.journal.lock().unwrap().is_empty());
    }

    async fn until_waiting(h: &Harness, id: &str) {
        loop {
            let history = h.store.load(id).await.unwrap();
            if history
                .iter()
                .any(|e| matches!(e, HistoryEvent::TimerCreated { .. }))
            {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unblock_signal_within_timeout_skips_notification() {
        let h = harness(Activities::default());
        let input = activation();
        let id = input.instance_id();
        h.runtime
            .start(&id, CARD_LIFECYCLE, serde_json::to_value(&input).unwrap())
            .await
            .unwrap();

        until_waiting(&h, &id).await;
        h.runtime.raise_signal(&id, UNBLOCK_SIGNAL).await.unwrap();

        assert_eq!(h.runtime.wait_for_completion(&id).await.unwrap(), success());
        assert_eq!(h.message.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_sends_exactly_one_notification() {
        let h = harness(Activities {
            message: ScriptedActivity::failing(SEND_MESSAGE, || {
                ActivityError::Unexpected("notifier down".into())
            }),
            ..Default::default()
        });
        let h_ok = harness(Activities::default());

        assert_eq!(run_to_end(&h_ok, &revocation()).await, success());
        assert_eq!(h_ok.message.calls(), 1);

        // A failing notification still ends in success.
        assert_eq!(run_to_end(&h, &revocation()).await, success());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_runs_no_compensation() {
        let h = harness(Activities {
            update: ScriptedActivity::succeeding(UPDATE_STATUS).with_delay(Duration::from_secs(30)),
            ..Default::default()
        });
        let input = activation();
        let id = input.instance_id();
        h.runtime
            .start(&id, CARD_LIFECYCLE, serde_json::to_value(&input).unwrap())
            .await
            .unwrap();
        while h.update.calls() == 0 {
            tokio::task::yield_now().await;
        }

        h.runtime.cancel(&id, "card expired").await.unwrap();

        assert_eq!(
            h.runtime.status(&id).await.unwrap(),
            Some(InstanceStatus::Cancelled {
                reason: "card expired".into()
            })
        );
        assert_eq!(h.message.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_instance_does_not_repeat_completed_activities() {
        let store: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
        let input = activation();
        let id = input.instance_id();
        // State left behind by a process that crashed after the status update.
        store
            .create(
                &id,
                HistoryEvent::OrchestrationStarted {
                    orchestration: CARD_LIFECYCLE.into(),
                    input: serde_json::to_value(&input).unwrap(),
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();
        for (seq, name) in [(1, STORE_EXPIRATION), (2, UPDATE_STATUS)] {
            store
                .append(&id, HistoryEvent::ActivityScheduled { seq, name: name.into() })
                .await
                .unwrap();
            store
                .append(
                    &id,
                    HistoryEvent::ActivityCompleted {
                        seq,
                        output: serde_json::json!({"kind": "SUCCESS"}),
                    },
                )
                .await
                .unwrap();
        }

        let h = harness_with(store, Activities::default(), ActivationHooks::default());
        assert_eq!(h.runtime.resume_all().await.unwrap(), 1);
        assert_eq!(h.runtime.wait_for_completion(&id).await.unwrap(), success());

        assert_eq!(h.persist.calls(), 0);
        assert_eq!(h.update.calls(), 0);
        assert_eq!(h.message.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn post_activation_hook_runs_only_for_activation() {
        let h = harness_with(
            Arc::new(MemoryHistoryStore::new()),
            Activities::default(),
            ActivationHooks {
                pre: None,
                post: Some(ACTIVATE_EYCA),
            },
        );

        run_to_end(&h, &revocation()).await;
        assert_eq!(h.eyca.calls(), 0);

        run_to_end(&h, &activation()).await;
        assert_eq!(h.eyca.calls(), 1);
        let journal = h.journal.lock().unwrap().clone();
        let tail = &journal[journal.len() - 4..];
        assert_eq!(tail, [STORE_EXPIRATION, UPDATE_STATUS, ACTIVATE_EYCA, SEND_MESSAGE]);
    }
}
