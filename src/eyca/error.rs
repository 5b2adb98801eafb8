//! Tipos de erro para o cliente da API EYCA.
//!
//! Define [`EycaError`] com variantes para erros da API, timeouts, códigos
//! inválidos e erros de rede. Todas são falhas de infraestrutura do ponto de
//! vista do orquestrador.

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API EYCA.
#[derive(Debug, Error)]
pub enum EycaError {
    /// A API respondeu com status HTTP de erro ou com `error != 0` no envelope.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// A requisição excedeu o timeout configurado.
    #[error("request timed out")]
    Timeout,

    /// O código retornado por `preissue_card` não é um código CCDB válido.
    #[error("invalid CCDB number: {0}")]
    InvalidCode(String),

    /// Falha de rede subjacente (DNS, conexão recusada, corpo inválido).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
