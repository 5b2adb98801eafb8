//! Host runtime for durable orchestrations.
//!
//! A [`Runtime`] owns the instance histories, drives each running instance on
//! its own task, routes signals and cancellations to it, and re-drives
//! unfinished instances from their history after a restart.

mod context;
mod history;
mod signal;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use context::{OrchestrationContext, OrchestrationError};
pub use history::{
    FileHistoryStore, HistoryEvent, HistoryStore, MemoryHistoryStore, Terminal, started_of,
    terminal_of,
};
pub use signal::SignalMailbox;

use crate::activity::{ActivityInvoker, ActivityResult, RetryPolicy};
use crate::error::RuntimeError;

/// A deterministic orchestration body.
///
/// Given the same input and history, `run` must issue the same sequence of
/// context calls.
pub trait Orchestration: Send + Sync {
    fn name(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        ctx: &'a mut OrchestrationContext,
        input: Value,
    ) -> BoxFuture<'a, Result<ActivityResult, OrchestrationError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    /// A non-terminal instance already exists under this id.
    Conflict { existing: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    AlreadyTerminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Completed(ActivityResult),
    Cancelled { reason: String },
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl From<&Terminal> for InstanceStatus {
    fn from(terminal: &Terminal) -> Self {
        match terminal {
            Terminal::Completed { result } => InstanceStatus::Completed(result.clone()),
            Terminal::Cancelled { reason } => InstanceStatus::Cancelled {
                reason: reason.clone(),
            },
        }
    }
}

/// Operations triggers and the expiration sweep need from the host runtime.
pub trait OrchestrationClient: Send + Sync {
    fn start(
        &self,
        instance: &str,
        orchestration: &str,
        input: Value,
    ) -> impl Future<Output = Result<StartOutcome, RuntimeError>> + Send;

    fn cancel(
        &self,
        instance: &str,
        reason: &str,
    ) -> impl Future<Output = Result<CancelOutcome, RuntimeError>> + Send;

    /// `None` when the instance never existed or its history was discarded.
    fn status(
        &self,
        instance: &str,
    ) -> impl Future<Output = Result<Option<InstanceStatus>, RuntimeError>> + Send;

    fn raise_signal(
        &self,
        instance: &str,
        signal: &str,
    ) -> impl Future<Output = Result<(), RuntimeError>> + Send;
}

struct Running {
    cancel: CancellationToken,
    cancel_reason: Arc<Mutex<Option<String>>>,
    mailbox: Arc<SignalMailbox>,
    done: watch::Receiver<bool>,
    generation: u64,
}

struct Inner {
    store: Arc<dyn HistoryStore>,
    invoker: ActivityInvoker,
    policy: RetryPolicy,
    orchestrations: HashMap<&'static str, Arc<dyn Orchestration>>,
    running: tokio::sync::Mutex<HashMap<String, Running>>,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

pub struct RuntimeBuilder {
    store: Arc<dyn HistoryStore>,
    invoker: ActivityInvoker,
    policy: RetryPolicy,
    orchestrations: HashMap<&'static str, Arc<dyn Orchestration>>,
}

impl RuntimeBuilder {
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn orchestration(mut self, orchestration: impl Orchestration + 'static) -> Self {
        self.orchestrations
            .insert(orchestration.name(), Arc::new(orchestration));
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(Inner {
                store: self.store,
                invoker: self.invoker,
                policy: self.policy,
                orchestrations: self.orchestrations,
                running: tokio::sync::Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    pub fn builder(store: Arc<dyn HistoryStore>, invoker: ActivityInvoker) -> RuntimeBuilder {
        RuntimeBuilder {
            store,
            invoker,
            policy: RetryPolicy::default(),
            orchestrations: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    fn orchestration(&self, name: &str) -> Result<Arc<dyn Orchestration>, RuntimeError> {
        self.inner
            .orchestrations
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownOrchestration(name.to_string()))
    }

    /// Start `orchestration` under `instance` unless a non-terminal instance holds that id.
    ///
    /// A finished or missing history is replaced by a fresh one.
    pub async fn start(&self, instance: &str, orchestration: &str, input: Value) -> Result<StartOutcome, RuntimeError> {
        let orch = self.orchestration(orchestration)?;
        let mut running = self.inner.running.lock().await;
        if running.contains_key(instance) {
            return Ok(StartOutcome::Conflict {
                existing: instance.to_string(),
            });
        }
        let history = self.inner.store.load(instance).await?;
        if !history.is_empty() && terminal_of(&history).is_none() {
            return Ok(StartOutcome::Conflict {
                existing: instance.to_string(),
            });
        }

        let started = HistoryEvent::OrchestrationStarted {
            orchestration: orch.name().to_string(),
            input: input.clone(),
            at: Utc::now(),
        };
        self.inner.store.create(instance, started.clone()).await?;
        self.launch(&mut running, instance.to_string(), orch, input, vec![started]);
        info!(orchestration, "orchestration started");
        Ok(StartOutcome::Accepted)
    }

    fn launch(
        &self,
        running: &mut HashMap<String, Running>,
        instance: String,
        orch: Arc<dyn Orchestration>,
        input: Value,
        history: Vec<HistoryEvent>,
    ) {
        let cancel = self.inner.shutdown.child_token();
        let cancel_reason = Arc::new(Mutex::new(None));
        let mailbox = Arc::new(SignalMailbox::from_history(&history));
        let (done_tx, done_rx) = watch::channel(false);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);

        running.insert(
            instance.clone(),
            Running {
                cancel: cancel.clone(),
                cancel_reason: cancel_reason.clone(),
                mailbox: mailbox.clone(),
                done: done_rx,
                generation,
            },
        );

        let ctx = OrchestrationContext::new(
            instance.clone(),
            &history,
            self.inner.store.clone(),
            self.inner.invoker.clone(),
            self.inner.policy.clone(),
            mailbox,
            cancel,
        );
        let runtime = self.clone();
        tokio::spawn(async move {
            runtime.drive(ctx, orch, input, cancel_reason).await;

            let mut running = runtime.inner.running.lock().await;
            if running
                .get(&instance)
                .is_some_and(|r| r.generation == generation)
            {
                running.remove(&instance);
            }
            drop(running);
            let _ = done_tx.send(true);
        });
    }

    async fn drive(
        &self,
        mut ctx: OrchestrationContext,
        orch: Arc<dyn Orchestration>,
        input: Value,
        cancel_reason: Arc<Mutex<Option<String>>>,
    ) {
        let name = orch.name();
        let terminal = match orch.run(&mut ctx, input).await {
            Ok(result) => {
                info!(orchestration = name, success = result.is_success(), "orchestration completed");
                Terminal::Completed { result }
            }
            Err(OrchestrationError::Cancelled) => {
                let reason = cancel_reason.lock().expect("cancel reason lock poisoned").take();
                match reason {
                    Some(reason) => {
                        info!(orchestration = name, "orchestration cancelled");
                        Terminal::Cancelled { reason }
                    }
                    None => {
                        // Runtime shutdown: keep the history open so the instance resumes.
                        debug!(orchestration = name, "orchestration suspended");
                        return;
                    }
                }
            }
            Err(OrchestrationError::Failed(failure)) => {
                warn!(orchestration = name, kind = %failure.kind, reason = %failure.reason, "orchestration failed");
                Terminal::Completed {
                    result: ActivityResult::from(&failure),
                }
            }
            Err(OrchestrationError::NonDeterministic(reason)) => {
                error!(orchestration = name, %reason, "replay diverged from history");
                Terminal::Completed {
                    result: ActivityResult::Failure { reason },
                }
            }
            Err(OrchestrationError::History(err)) => {
                error!(orchestration = name, error = %err, "history unavailable, instance left for resume");
                return;
            }
        };

        if let Err(err) = self
            .inner
            .store
            .append(ctx.instance_id(), HistoryEvent::OrchestrationCompleted { terminal })
            .await
        {
            error!(orchestration = name, error = %err, "cannot record orchestration outcome");
        }
    }

    pub async fn status(&self, instance: &str) -> Result<Option<InstanceStatus>, RuntimeError> {
        if self.inner.running.lock().await.contains_key(instance) {
            return Ok(Some(InstanceStatus::Running));
        }
        let history = self.inner.store.load(instance).await?;
        if history.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            terminal_of(&history)
                .map(InstanceStatus::from)
                .unwrap_or(InstanceStatus::Running),
        ))
    }

    pub async fn history(&self, instance: &str) -> Result<Vec<HistoryEvent>, RuntimeError> {
        Ok(self.inner.store.load(instance).await?)
    }

    /// Cancel `instance`, waiting until its task has stopped.
    ///
    /// No compensation runs; the instance ends as [`Terminal::Cancelled`].
    pub async fn cancel(&self, instance: &str, reason: &str) -> Result<CancelOutcome, RuntimeError> {
        let active = {
            let running = self.inner.running.lock().await;
            running
                .get(instance)
                .map(|r| (r.cancel.clone(), r.cancel_reason.clone(), r.done.clone()))
        };
        if let Some((token, cancel_reason, mut done)) = active {
            *cancel_reason.lock().expect("cancel reason lock poisoned") = Some(reason.to_string());
            token.cancel();
            let _ = done.wait_for(|finished| *finished).await;

            let history = self.inner.store.load(instance).await?;
            return Ok(match terminal_of(&history) {
                Some(Terminal::Cancelled { .. }) => CancelOutcome::Cancelled,
                Some(Terminal::Completed { .. }) => CancelOutcome::AlreadyTerminal,
                None => return Err(RuntimeError::Abandoned(instance.to_string())),
            });
        }

        let history = self.inner.store.load(instance).await?;
        if history.is_empty() {
            return Ok(CancelOutcome::NotFound);
        }
        if terminal_of(&history).is_some() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        // Unfinished history with no task behind it (not resumed yet).
        self.inner
            .store
            .append(
                instance,
                HistoryEvent::OrchestrationCompleted {
                    terminal: Terminal::Cancelled {
                        reason: reason.to_string(),
                    },
                },
            )
            .await?;
        Ok(CancelOutcome::Cancelled)
    }

    /// Deliver `signal` to `instance`. Signals to finished instances are dropped.
    pub async fn raise_signal(&self, instance: &str, signal: &str) -> Result<(), RuntimeError> {
        let history = self.inner.store.load(instance).await?;
        if history.is_empty() {
            return Err(RuntimeError::InstanceNotFound(instance.to_string()));
        }
        if terminal_of(&history).is_some() {
            debug!(signal, "signal for finished instance ignored");
            return Ok(());
        }
        self.inner
            .store
            .append(
                instance,
                HistoryEvent::SignalReceived {
                    name: signal.to_string(),
                },
            )
            .await?;
        if let Some(running) = self.inner.running.lock().await.get(instance) {
            running.mailbox.raise(signal);
        }
        debug!(signal, "signal delivered");
        Ok(())
    }

    /// Wait until `instance` stops and return its terminal outcome.
    pub async fn wait_for_completion(&self, instance: &str) -> Result<Terminal, RuntimeError> {
        let done = {
            let running = self.inner.running.lock().await;
            running.get(instance).map(|r| r.done.clone())
        };
        if let Some(mut done) = done {
            let _ = done.wait_for(|finished| *finished).await;
        }
        let history = self.inner.store.load(instance).await?;
        if history.is_empty() {
            return Err(RuntimeError::InstanceNotFound(instance.to_string()));
        }
        terminal_of(&history)
            .cloned()
            .ok_or_else(|| RuntimeError::Abandoned(instance.to_string()))
    }

    /// Re-drive every stored instance without a terminal event. Returns how many resumed.
    pub async fn resume_all(&self) -> Result<usize, RuntimeError> {
        let mut resumed = 0;
        for instance in self.inner.store.instances().await? {
            let mut running = self.inner.running.lock().await;
            if running.contains_key(&instance) {
                continue;
            }
            let history = match self.inner.store.load(&instance).await {
                Ok(history) => history,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable history");
                    continue;
                }
            };
            if history.is_empty() || terminal_of(&history).is_some() {
                continue;
            }
            let Some((name, input)) = started_of(&history).map(|(n, i)| (n.to_string(), i.clone())) else {
                warn!("skipping history without a start event");
                continue;
            };
            let orch = match self.orchestration(&name) {
                Ok(orch) => orch,
                Err(err) => {
                    warn!(error = %err, "skipping instance");
                    continue;
                }
            };
            self.launch(&mut running, instance, orch, input, history);
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "resumed unfinished orchestrations");
        }
        Ok(resumed)
    }

    /// Stop every running instance, leaving its history open for a later resume.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let waiting: Vec<watch::Receiver<bool>> = {
            let running = self.inner.running.lock().await;
            running.values().map(|r| r.done.clone()).collect()
        };
        for mut done in waiting {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

impl OrchestrationClient for Runtime {
    async fn start(&self, instance: &str, orchestration: &str, input: Value) -> Result<StartOutcome, RuntimeError> {
        Runtime::start(self, instance, orchestration, input).await
    }

    async fn cancel(&self, instance: &str, reason: &str) -> Result<CancelOutcome, RuntimeError> {
        Runtime::cancel(self, instance, reason).await
    }

    async fn status(&self, instance: &str) -> Result<Option<InstanceStatus>, RuntimeError> {
        Runtime::status(self, instance).await
    }

    async fn raise_signal(&self, instance: &str, signal: &str) -> Result<(), RuntimeError> {
        Runtime::raise_signal(self, instance, signal).await
    }
}
