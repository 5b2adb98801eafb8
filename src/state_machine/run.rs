use serde::{Deserialize, Serialize};

use super::step::Step;
use crate::activity::{ActivityResult, Failure, FailureKind};
use crate::card::StatusKind;

/// Orchestration-local state of one lifecycle run.
///
/// Rebuilt from scratch on every replay; nothing here is persisted directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleRun {
    /// Known once the input has been decoded.
    pub target: Option<StatusKind>,
    pub step: Step,
    pub step_history: Vec<Step>,
    /// The failure that sent the run to compensation.
    pub failure: Option<Failure>,
    pub result: Option<ActivityResult>,
}

impl LifecycleRun {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Structured record of a finished run, emitted as a log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub target: Option<StatusKind>,
    pub steps: Vec<Step>,
    pub success: bool,
    pub failure_kind: Option<FailureKind>,
}

impl RunSummary {
    pub fn from_run(run: &LifecycleRun) -> Self {
        let mut steps = run.step_history.clone();
        steps.push(run.step);
        Self {
            target: run.target,
            steps,
            success: run.result.as_ref().is_some_and(ActivityResult::is_success),
            failure_kind: run.failure.as_ref().map(|f| f.kind),
        }
    }

    /// Steps joined with arrows, e.g. `DECODING → UPDATE_STATUS → END`.
    pub fn path(&self) -> String {
        self.steps
            .iter()
            .map(Step::to_string)
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{StateMachine, StepOutcome};

    #[test]
    fn new_run_starts_decoding() {
        let run = LifecycleRun::new();
        assert_eq!(run.step, Step::Decoding);
        assert!(run.step_history.is_empty());
        assert!(run.target.is_none());
    }

    #[test]
    fn summary_of_failed_run() {
        let mut run = LifecycleRun::new();
        StateMachine::next(&mut run, StepOutcome::Success);
        run.target = Some(StatusKind::Revoked);
        StateMachine::next(&mut run, StepOutcome::Success);
        StateMachine::next(&mut run, StepOutcome::Failure(Failure::permanent("already final")));
        StateMachine::next(&mut run, StepOutcome::Success);

        let summary = RunSummary::from_run(&run);
        assert!(!summary.success);
        assert_eq!(summary.failure_kind, Some(FailureKind::Permanent));
        assert_eq!(
            summary.path(),
            "DECODING → PRE_ACTIVATION_HOOK → UPDATE_STATUS → COMPENSATING → END"
        );
    }
}
