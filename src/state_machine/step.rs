use std::fmt;

use serde::{Deserialize, Serialize};

use super::run::LifecycleRun;
use crate::activity::{ActivityResult, Failure};
use crate::card::StatusKind;

/// Steps of a lifecycle orchestration instance (not of the card).
///
/// DECODING → PRE_ACTIVATION_HOOK → PERSIST_EXPIRATION → UPDATE_STATUS →
/// POST_ACTIVATION_HOOK → AWAIT_ACK_OR_NOTIFY → END, with COMPENSATING
/// reachable from the four middle steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    #[default]
    Decoding,
    PreActivationHook,
    PersistExpiration,
    UpdateStatus,
    PostActivationHook,
    AwaitAckOrNotify,
    Compensating,
    End,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Decoding => write!(f, "DECODING"),
            Step::PreActivationHook => write!(f, "PRE_ACTIVATION_HOOK"),
            Step::PersistExpiration => write!(f, "PERSIST_EXPIRATION"),
            Step::UpdateStatus => write!(f, "UPDATE_STATUS"),
            Step::PostActivationHook => write!(f, "POST_ACTIVATION_HOOK"),
            Step::AwaitAckOrNotify => write!(f, "AWAIT_ACK_OR_NOTIFY"),
            Step::Compensating => write!(f, "COMPENSATING"),
            Step::End => write!(f, "END"),
        }
    }
}

/// The result of executing the current step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure(Failure),
}

/// The result of evaluating a step transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Advance to the next step.
    Next(Step),
    /// Run the failure notification, then finish with this failure.
    Compensate(Failure),
    /// The run is over.
    Complete(ActivityResult),
}

/// Drives a `LifecycleRun` through its steps.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the next transition for `run`.
    ///
    /// - `Decoding` failure completes at once; nothing has happened yet that
    ///   would warrant a notification.
    /// - Failures in the hook, expiration and status steps go to
    ///   `Compensating`, which always completes with the original failure.
    /// - `PersistExpiration` is only entered for an `Activated` target.
    /// - `AwaitAckOrNotify` always completes successfully.
    /// - `End` is absorbing.
    pub fn next(run: &mut LifecycleRun, outcome: StepOutcome) -> Transition {
        let transition = match (run.step, outcome) {
            (Step::Decoding, StepOutcome::Success) => Transition::Next(Step::PreActivationHook),
            (Step::Decoding, StepOutcome::Failure(failure)) => {
                Transition::Complete(ActivityResult::from(&failure))
            }
            (Step::PreActivationHook, StepOutcome::Success) => {
                if run.target == Some(StatusKind::Activated) {
                    Transition::Next(Step::PersistExpiration)
                } else {
                    Transition::Next(Step::UpdateStatus)
                }
            }
            (Step::PersistExpiration, StepOutcome::Success) => Transition::Next(Step::UpdateStatus),
            (Step::UpdateStatus, StepOutcome::Success) => Transition::Next(Step::PostActivationHook),
            (Step::PostActivationHook, StepOutcome::Success) => {
                Transition::Next(Step::AwaitAckOrNotify)
            }
            (
                Step::PreActivationHook
                | Step::PersistExpiration
                | Step::UpdateStatus
                | Step::PostActivationHook,
                StepOutcome::Failure(failure),
            ) => Transition::Compensate(failure),
            (Step::AwaitAckOrNotify, _) => Transition::Complete(ActivityResult::Success),
            // The notification's own outcome never replaces the original failure.
            (Step::Compensating, _) => match &run.failure {
                Some(original) => Transition::Complete(ActivityResult::from(original)),
                None => Transition::Complete(ActivityResult::Failure {
                    reason: "compensation without a recorded failure".into(),
                }),
            },
            (Step::End, _) => {
                Transition::Complete(run.result.clone().unwrap_or(ActivityResult::Success))
            }
        };

        match &transition {
            Transition::Next(next) => {
                run.step_history.push(run.step);
                run.step = *next;
            }
            Transition::Compensate(failure) => {
                run.step_history.push(run.step);
                run.step = Step::Compensating;
                run.failure = Some(failure.clone());
            }
            Transition::Complete(result) => {
                if run.step != Step::End {
                    run.step_history.push(run.step);
                    run.step = Step::End;
                    run.result = Some(result.clone());
                }
            }
        }

        transition
    }
}
