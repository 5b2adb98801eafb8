//! Tipos de dados para requisições e respostas da API EYCA (CCDB).
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado pelos endpoints `preissue_card` e `update_card`.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para o endpoint `preissue_card`.
///
/// Contém apenas as credenciais e o formato de resposta desejado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreIssueRequest {
    pub username: String,
    pub password: String,
    /// Formato da resposta ("json"). Serializado como "type".
    #[serde(rename = "type")]
    pub format: String,
}

/// Corpo da requisição para o endpoint `update_card`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCardRequest {
    pub username: String,
    pub password: String,
    #[serde(rename = "type")]
    pub format: String,
    /// Código CCDB do cartão pré-emitido.
    pub ccdb_number: String,
    /// Data de expiração no formato `AAAA-MM-DD`.
    pub card_date_expiration: String,
}

/// Envelope comum a todas as respostas da API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub api_response: ApiResponse,
}

/// Resultado de uma chamada: `error == 0` indica sucesso e `text` carrega o
/// valor retornado (o código CCDB no caso de `preissue_card`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub error: i32,
    pub text: String,
}

impl ApiResponse {
    pub fn is_error(&self) -> bool {
        self.error != 0
    }
}

/// Verifica o formato de um código CCDB (`A123-B456-C789`).
pub fn is_ccdb_number(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == 3
        && groups.iter().all(|g| {
            let mut chars = g.chars();
            g.len() == 4
                && chars.next().is_some_and(|c| c.is_ascii_uppercase())
                && chars.all(|c| c.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_issue_request_renames_type_field() {
        let req = PreIssueRequest {
            username: "user".into(),
            password: "secret".into(),
            format: "json".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""type":"json""#));
        assert!(!json.contains("format"));
    }

    #[test]
    fn envelope_deserializes_from_api_format() {
        let json = r#"{"api_response": {"error": 0, "text": "A123-B456-C789"}}"#;
        let envelope: ApiEnvelope = serde_json::from_str(json).unwrap();
        assert!(!envelope.api_response.is_error());
        assert_eq!(envelope.api_response.text, "A123-B456-C789");
    }

    #[test]
    fn ccdb_number_format() {
        assert!(is_ccdb_number("A123-B456-C789"));
        assert!(!is_ccdb_number("A123-B456"));
        assert!(!is_ccdb_number("a123-B456-C789"));
        assert!(!is_ccdb_number("A12X-B456-C789"));
    }
}
