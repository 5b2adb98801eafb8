mod run;
mod step;

pub use run::{LifecycleRun, RunSummary};
pub use step::{StateMachine, Step, StepOutcome, Transition};
