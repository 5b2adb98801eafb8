//! Interface de terminal do cardflow: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`LifecycleProgress`] acompanha visualmente
//! uma instância de ciclo de vida a partir dos eventos do seu histórico.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::activity::ActivityResult;
use crate::runtime::{HistoryEvent, InstanceStatus, Terminal};

/// Indicador visual de progresso para uma instância no terminal.
///
/// Exibe um spinner durante o processamento e mensagens coloridas para
/// sucesso (verde), falha (vermelho) e eventos intermediários (amarelo).
pub struct LifecycleProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl LifecycleProgress {
    /// Inicia o spinner com uma descrição da transição.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        // Template fixo e válido; em caso de erro mantém o estilo padrão.
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("START: {description}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner a partir de um evento do histórico.
    pub fn observe(&self, event: &HistoryEvent) {
        match event {
            HistoryEvent::ActivityScheduled { name, .. } => self.pb.set_message(name.clone()),
            HistoryEvent::ActivityFailed { failure, .. } => {
                self.pb.println(format!(
                    "  {} {}: {}",
                    self.yellow.apply_to("↻"),
                    failure.kind,
                    failure.reason
                ));
            }
            HistoryEvent::TimerCreated { signal, .. } => {
                self.pb.set_message(format!("waiting for `{signal}`"));
            }
            HistoryEvent::WaitCompleted { signalled, .. } => {
                let label = if *signalled { "acknowledged" } else { "no acknowledgement" };
                self.pb.println(format!("  {} {label}", self.yellow.apply_to("•")));
            }
            _ => {}
        }
    }

    /// Finaliza o spinner e exibe o resultado final.
    pub fn complete(&self, terminal: &Terminal) {
        self.pb.finish_and_clear();
        match terminal {
            Terminal::Completed {
                result: ActivityResult::Success,
            } => {
                println!("  {} Transition completed", self.green.apply_to("✓"));
            }
            Terminal::Completed {
                result: ActivityResult::Failure { reason },
            } => {
                println!("  {} Transition failed: {reason}", self.red.apply_to("✗"));
            }
            Terminal::Cancelled { reason } => {
                println!("  {} Cancelled: {reason}", self.yellow.apply_to("⊘"));
            }
        }
    }

    /// Imprime o status de uma instância com a cor correspondente.
    pub fn print_status(&self, instance: &str, status: Option<&InstanceStatus>) {
        self.pb.finish_and_clear();
        let (style, label) = match status {
            None => (&self.red, "unknown".to_string()),
            Some(InstanceStatus::Running) => (&self.yellow, "running".to_string()),
            Some(InstanceStatus::Completed(ActivityResult::Success)) => {
                (&self.green, "completed".to_string())
            }
            Some(InstanceStatus::Completed(ActivityResult::Failure { reason })) => {
                (&self.red, format!("failed: {reason}"))
            }
            Some(InstanceStatus::Cancelled { reason }) => {
                (&self.yellow, format!("cancelled: {reason}"))
            }
        };
        println!("{instance}: {}", style.apply_to(label));
    }

    /// Imprime o histórico formatado em JSON, um evento por linha.
    pub fn print_history(&self, events: &[HistoryEvent]) {
        println!();
        println!("{}", self.green.apply_to("─── History ───"));
        for event in events {
            println!("{}", serde_json::to_string(event).unwrap_or_default());
        }
    }
}
