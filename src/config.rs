//! Configuração do cardflow carregada a partir de `cardflow.toml`.
//!
//! A struct [`CardflowConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam os defaults da política de retentativa
//! do orquestrador. A variável de ambiente `CARDFLOW_EYCA_PASSWORD` tem
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::activity::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "cardflow.toml";

/// Configuração de nível superior carregada de `cardflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CardflowConfig {
    /// Política de retentativa aplicada a cada atividade.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Tempo máximo de espera pelo sinal `unblock`, em segundos.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,

    /// Idade (exclusiva) até a qual o cidadão pode ter um cartão EYCA.
    #[serde(default = "default_eyca_upper_bound_age")]
    pub eyca_upper_bound_age: u32,

    /// Intervalo entre duas varreduras de expiração, em segundos.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Diretório do histórico durável das instâncias.
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Credenciais da API EYCA. Sem esta seção a ativação EYCA fica desligada.
    #[serde(default)]
    pub eyca: Option<EycaConfig>,
}

/// Parâmetros da política de retentativa.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,

    #[serde(default = "default_start_to_close_timeout_secs")]
    pub start_to_close_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EycaConfig {
    pub base_url: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

// Valor padrão para tentativas: 3.
fn default_max_attempts() -> u32 {
    3
}

// Valor padrão para o primeiro intervalo: 3000ms.
fn default_initial_interval_ms() -> u64 {
    3000
}

// Backoff constante por padrão.
fn default_backoff_coefficient() -> f64 {
    1.0
}

fn default_start_to_close_timeout_secs() -> u64 {
    60
}

fn default_ack_timeout_secs() -> u64 {
    60
}

fn default_eyca_upper_bound_age() -> u32 {
    30
}

// Uma varredura por dia.
fn default_sweep_interval_secs() -> u64 {
    86_400
}

fn default_history_dir() -> PathBuf {
    PathBuf::from(".cardflow/history")
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval_ms: default_initial_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            start_to_close_timeout_secs: default_start_to_close_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_interval_ms),
            backoff_multiplier: self.backoff_coefficient,
            per_call_timeout: Duration::from_secs(self.start_to_close_timeout_secs),
        }
    }
}

impl Default for CardflowConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            ack_timeout_secs: default_ack_timeout_secs(),
            eyca_upper_bound_age: default_eyca_upper_bound_age(),
            sweep_interval_secs: default_sweep_interval_secs(),
            history_dir: default_history_dir(),
            eyca: None,
        }
    }
}

impl CardflowConfig {
    /// Carrega a configuração de `path`, ou de `cardflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<CardflowConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para a senha.
        if let Ok(password) = std::env::var("CARDFLOW_EYCA_PASSWORD") {
            if !password.is_empty() {
                if let Some(eyca) = config.eyca.as_mut() {
                    eyca.password = password;
                }
            }
        }

        Ok(config)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
