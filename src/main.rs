use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cardflow::app::App;
use cardflow::card::{StatusKind, SubjectId};
use cardflow::cli::{Cli, Command};
use cardflow::config::CardflowConfig;
use cardflow::notification::{LogNotifier, OutboxNotifier};
use cardflow::runtime::{
    FileHistoryStore, HistoryEvent, HistoryStore, InstanceStatus, MemoryHistoryStore, terminal_of,
};
use cardflow::ui::LifecycleProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = CardflowConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Demo { subject, ack } => demo(config, SubjectId::new(subject), ack).await,
        Command::Worker => worker(config).await,
        Command::Status { instance } => {
            let events = load_history(&config, &instance).await?;
            let status = (!events.is_empty()).then(|| status_of(&events));
            LifecycleProgress::start(&instance).print_status(&instance, status.as_ref());
            Ok(())
        }
        Command::History { instance } => {
            let events = load_history(&config, &instance).await?;
            if events.is_empty() {
                anyhow::bail!("no history stored for the given instance");
            }
            let progress = LifecycleProgress::start(&instance);
            progress.print_status(&instance, Some(&status_of(&events)));
            progress.print_history(&events);
            Ok(())
        }
    }
}

async fn load_history(config: &CardflowConfig, instance: &str) -> Result<Vec<HistoryEvent>> {
    let store = FileHistoryStore::new(config.history_dir.clone());
    store
        .load(instance)
        .await
        .with_context(|| format!("reading history from {}", config.history_dir.display()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "cardflow=debug" } else { "cardflow=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn status_of(events: &[HistoryEvent]) -> InstanceStatus {
    terminal_of(events)
        .map(InstanceStatus::from)
        .unwrap_or(InstanceStatus::Running)
}

/// Activate one card against in-memory stores and show how it went.
async fn demo(mut config: CardflowConfig, subject: SubjectId, ack: bool) -> Result<()> {
    // Short acknowledgement window so the demo finishes quickly.
    config.ack_timeout_secs = config.ack_timeout_secs.min(5);
    let outbox = Arc::new(OutboxNotifier::new());
    let app = App::bootstrap(&config, Arc::new(MemoryHistoryStore::new()), outbox.clone())?;

    let progress = LifecycleProgress::start("card activation");
    let response = app
        .service
        .start_activation(&subject)
        .await
        .context("activation request rejected")?;
    let instance = response.instance_id().to_string();

    let mut seen = 0;
    let mut acknowledged = false;
    let events = loop {
        let events = app.runtime.history(&instance).await?;
        for event in &events[seen..] {
            progress.observe(event);
            if ack && !acknowledged && matches!(event, HistoryEvent::TimerCreated { .. }) {
                app.service.unblock(&subject, StatusKind::Activated).await?;
                acknowledged = true;
            }
        }
        seen = events.len();
        if terminal_of(&events).is_some() {
            break events;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    if let Some(terminal) = terminal_of(&events) {
        progress.complete(terminal);
    }
    info!(messages = outbox.sent().len(), "citizen notifications");
    progress.print_history(&events);
    Ok(())
}

/// Resume unfinished instances and sweep expirations until Ctrl-C.
async fn worker(config: CardflowConfig) -> Result<()> {
    let history: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::new(config.history_dir.clone()));
    let app = App::bootstrap(&config, history, Arc::new(LogNotifier))?;
    app.resume().await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
    app.serve(cancel).await;
    Ok(())
}
