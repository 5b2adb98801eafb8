//! Interface de linha de comando do cardflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, worker, status,
//! history) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cardflow: orquestração durável do ciclo de vida de cartões.
#[derive(Debug, Parser)]
#[command(name = "cardflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `cardflow.toml`).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa uma ativação completa em memória e mostra o histórico.
    Demo {
        /// Código fiscal do cidadão usado na demonstração.
        #[arg(long, default_value = "BNCLRA01A41H501X")]
        subject: String,

        /// Envia o sinal `unblock` em vez de esperar o timeout.
        #[arg(long, default_value_t = false)]
        ack: bool,
    },

    /// Retoma instâncias pendentes e roda a varredura de expiração.
    Worker,

    /// Mostra o status de uma instância a partir do histórico durável.
    Status {
        /// Id da instância (ex.: `cgn-activated-<código fiscal>`).
        instance: String,
    },

    /// Imprime os eventos do histórico de uma instância.
    History {
        instance: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_demo_defaults() {
        let cli = Cli::parse_from(["cardflow", "demo"]);
        match cli.command {
            Command::Demo { subject, ack } => {
                assert_eq!(subject, "BNCLRA01A41H501X");
                assert!(!ack);
            }
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "cardflow",
            "--config",
            "prod.toml",
            "--verbose",
            "status",
            "cgn-activated-X",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("prod.toml")));
        match cli.command {
            Command::Status { instance } => assert_eq!(instance, "cgn-activated-X"),
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn cli_parses_demo_with_ack() {
        let cli = Cli::parse_from(["cardflow", "demo", "--ack", "--subject", "RSSMRA05A01H501X"]);
        assert!(matches!(cli.command, Command::Demo { ack: true, .. }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
