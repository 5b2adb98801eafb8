//! Composition root: wires stores, activities, the runtime, the trigger
//! service and the expiration sweep from a [`CardflowConfig`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::activity::{
    ACTIVATE_EYCA, ActivityInvoker, ActivityRegistry, EycaActivationActivity, SendMessageActivity,
    StoreExpirationActivity, UpdateStatusActivity,
};
use crate::card::MemoryCardStore;
use crate::config::CardflowConfig;
use crate::error::CardflowError;
use crate::expiration::MemoryExpirationStore;
use crate::eyca::EycaClient;
use crate::notification::Notifier;
use crate::orchestrator::{ActivationHooks, CardLifecycleOrchestrator};
use crate::runtime::{HistoryStore, Runtime};
use crate::sweep::ExpirationSweep;
use crate::trigger::LifecycleService;

pub type Service = LifecycleService<Runtime, MemoryCardStore>;
pub type Sweep = ExpirationSweep<Runtime, MemoryExpirationStore>;

pub struct App {
    pub runtime: Arc<Runtime>,
    pub service: Service,
    pub sweep: Sweep,
    pub cards: Arc<MemoryCardStore>,
    pub eyca_cards: Arc<MemoryCardStore>,
    pub expirations: Arc<MemoryExpirationStore>,
    sweep_interval: Duration,
}

impl App {
    /// Build every component. EYCA activation is wired only when `config.eyca` is set.
    pub fn bootstrap<N: Notifier + 'static>(
        config: &CardflowConfig,
        history: Arc<dyn HistoryStore>,
        notifier: Arc<N>,
    ) -> Result<Self, CardflowError> {
        let cards = Arc::new(MemoryCardStore::new());
        let eyca_cards = Arc::new(MemoryCardStore::new());
        let expirations = Arc::new(MemoryExpirationStore::new());

        let mut registry = ActivityRegistry::new();
        registry
            .register(StoreExpirationActivity::new(expirations.clone()))
            .register(UpdateStatusActivity::new(cards.clone()))
            .register(SendMessageActivity::new(notifier));

        let mut hooks = ActivationHooks::default();
        if let Some(eyca) = &config.eyca {
            let issuer = EycaClient::new(
                eyca.base_url.clone(),
                eyca.username.clone(),
                eyca.password.clone(),
            )?;
            registry.register(EycaActivationActivity::new(
                eyca_cards.clone(),
                Arc::new(issuer),
                config.eyca_upper_bound_age,
            ));
            hooks.post = Some(ACTIVATE_EYCA);
        }

        let runtime = Arc::new(
            Runtime::builder(history, ActivityInvoker::new(registry))
                .policy(config.retry.policy())
                .orchestration(CardLifecycleOrchestrator::new(config.ack_timeout()).with_hooks(hooks))
                .build(),
        );

        let mut service = LifecycleService::new(runtime.clone(), cards.clone());
        if config.eyca.is_some() {
            service = service.with_eyca(eyca_cards.clone(), config.eyca_upper_bound_age);
        }
        let sweep = ExpirationSweep::new(runtime.clone(), expirations.clone());

        Ok(Self {
            runtime,
            service,
            sweep,
            cards,
            eyca_cards,
            expirations,
            sweep_interval: config.sweep_interval(),
        })
    }

    /// Pick up every orchestration left unfinished by a previous process.
    pub async fn resume(&self) -> Result<usize, CardflowError> {
        Ok(self.runtime.resume_all().await?)
    }

    /// Run the expiration sweep until `cancel` fires, then stop the runtime.
    pub async fn serve(&self, cancel: CancellationToken) {
        info!(interval_secs = self.sweep_interval.as_secs(), "worker started");
        self.sweep.run_periodically(self.sweep_interval, cancel).await;
        self.runtime.shutdown().await;
        info!("worker stopped");
    }
}
