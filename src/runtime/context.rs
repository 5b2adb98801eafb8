use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::history::{HistoryEvent, HistoryStore};
use super::signal::SignalMailbox;
use crate::activity::{ActivityInvoker, Failure, RetryPolicy};
use crate::error::HistoryError;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{0}")]
    Failed(Failure),

    #[error("orchestration cancelled")]
    Cancelled,

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("history does not match orchestration code: {0}")]
    NonDeterministic(String),
}

/// What the history says about one sequence number.
#[derive(Debug, Default)]
struct Recorded {
    scheduled: Option<String>,
    completed: Option<Value>,
    failed: Option<Failure>,
    timer: Option<(String, DateTime<Utc>)>,
    waited: Option<(String, bool)>,
}

/// Handle given to an orchestration body.
///
/// Every call consumes the next sequence number. When the history already
/// holds the outcome for that number the call returns it without side effects;
/// otherwise the call is executed and its outcome appended before returning.
pub struct OrchestrationContext {
    instance: String,
    recorded: HashMap<u64, Recorded>,
    next_seq: u64,
    store: Arc<dyn HistoryStore>,
    invoker: ActivityInvoker,
    policy: RetryPolicy,
    mailbox: Arc<SignalMailbox>,
    cancel: CancellationToken,
}

impl OrchestrationContext {
    pub(crate) fn new(
        instance: String,
        history: &[HistoryEvent],
        store: Arc<dyn HistoryStore>,
        invoker: ActivityInvoker,
        policy: RetryPolicy,
        mailbox: Arc<SignalMailbox>,
        cancel: CancellationToken,
    ) -> Self {
        let mut recorded: HashMap<u64, Recorded> = HashMap::new();
        for event in history {
            match event {
                HistoryEvent::ActivityScheduled { seq, name } => {
                    recorded.entry(*seq).or_default().scheduled = Some(name.clone());
                }
                HistoryEvent::ActivityCompleted { seq, output } => {
                    recorded.entry(*seq).or_default().completed = Some(output.clone());
                }
                HistoryEvent::ActivityFailed { seq, failure } => {
                    recorded.entry(*seq).or_default().failed = Some(failure.clone());
                }
                HistoryEvent::TimerCreated {
                    seq,
                    signal,
                    fire_at,
                } => {
                    recorded.entry(*seq).or_default().timer = Some((signal.clone(), *fire_at));
                }
                HistoryEvent::WaitCompleted {
                    seq,
                    signal,
                    signalled,
                } => {
                    recorded.entry(*seq).or_default().waited = Some((signal.clone(), *signalled));
                }
                HistoryEvent::OrchestrationStarted { .. }
                | HistoryEvent::SignalReceived { .. }
                | HistoryEvent::OrchestrationCompleted { .. } => {}
            }
        }
        Self {
            instance,
            recorded,
            next_seq: 1,
            store,
            invoker,
            policy,
            mailbox,
            cancel,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    /// Whether the next call will be answered from history.
    pub fn is_replaying(&self) -> bool {
        self.recorded.contains_key(&self.next_seq)
    }

    fn take_seq(&mut self) -> (u64, Option<Recorded>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        (seq, self.recorded.remove(&seq))
    }

    async fn append(&self, event: HistoryEvent) -> Result<(), HistoryError> {
        self.store.append(&self.instance, event).await
    }

    /// Run activity `name` under the context's retry policy.
    pub async fn call_activity(&mut self, name: &str, input: Value) -> Result<Value, OrchestrationError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }
        let (seq, recorded) = self.take_seq();
        let recorded = recorded.unwrap_or_default();

        match &recorded.scheduled {
            Some(scheduled) if scheduled != name => {
                return Err(OrchestrationError::NonDeterministic(format!(
                    "step {seq} was {scheduled}, now {name}"
                )));
            }
            Some(_) => {
                if let Some(output) = recorded.completed {
                    debug!(activity = name, seq, "replayed activity result");
                    return Ok(output);
                }
                if let Some(failure) = recorded.failed {
                    debug!(activity = name, seq, "replayed activity failure");
                    return Err(OrchestrationError::Failed(failure));
                }
                // Scheduled before a crash, outcome never recorded: run it again.
            }
            None if recorded.timer.is_some() || recorded.waited.is_some() => {
                return Err(OrchestrationError::NonDeterministic(format!(
                    "step {seq} was a signal wait, now {name}"
                )));
            }
            None => {
                self.append(HistoryEvent::ActivityScheduled {
                    seq,
                    name: name.to_string(),
                })
                .await?;
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            outcome = self.invoker.invoke(name, input, &self.policy) => outcome,
        };

        match outcome {
            Ok(output) => {
                self.append(HistoryEvent::ActivityCompleted {
                    seq,
                    output: output.clone(),
                })
                .await?;
                Ok(output)
            }
            Err(failure) => {
                self.append(HistoryEvent::ActivityFailed {
                    seq,
                    failure: failure.clone(),
                })
                .await?;
                Err(OrchestrationError::Failed(failure))
            }
        }
    }

    /// Wait for `signal` for at most `timeout`; `true` when the signal arrived.
    ///
    /// The deadline is recorded on first execution, so a wait resumed after a
    /// restart keeps its original deadline.
    pub async fn wait_for_signal(&mut self, signal: &str, timeout: Duration) -> Result<bool, OrchestrationError> {
        if self.cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }
        let (seq, recorded) = self.take_seq();
        let recorded = recorded.unwrap_or_default();

        if let Some(name) = &recorded.scheduled {
            return Err(OrchestrationError::NonDeterministic(format!(
                "step {seq} was {name}, now a wait for {signal}"
            )));
        }
        if let Some((waited, signalled)) = recorded.waited {
            if waited != signal {
                return Err(OrchestrationError::NonDeterministic(format!(
                    "step {seq} waited for {waited}, now for {signal}"
                )));
            }
            return Ok(signalled);
        }

        let fire_at = match recorded.timer {
            Some((_, fire_at)) => fire_at,
            None => {
                let delta = chrono::Duration::from_std(timeout)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
                let fire_at = Utc::now() + delta;
                self.append(HistoryEvent::TimerCreated {
                    seq,
                    signal: signal.to_string(),
                    fire_at,
                })
                .await?;
                fire_at
            }
        };
        let remaining = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let signalled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            _ = self.mailbox.take(signal) => true,
            _ = tokio::time::sleep(remaining) => false,
        };
        self.append(HistoryEvent::WaitCompleted {
            seq,
            signal: signal.to_string(),
            signalled,
        })
        .await?;
        debug!(signal, signalled, "signal wait finished");
        Ok(signalled)
    }
}
