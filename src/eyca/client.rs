use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Client;

use super::error::EycaError;
use super::types::{ApiEnvelope, PreIssueRequest, UpdateCardRequest, is_ccdb_number};

/// Issues EYCA card codes and registers their expiration.
pub trait CardIssuer: Send + Sync {
    fn pre_issue_code(&self) -> impl Future<Output = Result<String, EycaError>> + Send;

    fn update_card(
        &self,
        code: &str,
        expiration_date: NaiveDate,
    ) -> impl Future<Output = Result<(), EycaError>> + Send;
}

pub struct EycaClient {
    username: String,
    password: String,
    client: Client,
    base_url: String,
}

impl EycaClient {
    pub fn new(base_url: String, username: String, password: String) -> Result<Self, EycaError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            username,
            password,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: serde::Serialize>(&self, endpoint: &str, body: &T) -> Result<String, EycaError> {
        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EycaError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let envelope = response.json::<ApiEnvelope>().await.map_err(map_transport)?;
        if envelope.api_response.is_error() {
            return Err(EycaError::ApiError {
                status: status.as_u16(),
                message: envelope.api_response.text,
            });
        }
        Ok(envelope.api_response.text)
    }
}

fn map_transport(err: reqwest::Error) -> EycaError {
    if err.is_timeout() {
        EycaError::Timeout
    } else {
        EycaError::NetworkError(err)
    }
}

impl CardIssuer for EycaClient {
    async fn pre_issue_code(&self) -> Result<String, EycaError> {
        let req = PreIssueRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            format: "json".into(),
        };
        let code = self.post("preissue_card", &req).await?;
        let code = code.trim().to_string();
        if !is_ccdb_number(&code) {
            return Err(EycaError::InvalidCode(code));
        }
        Ok(code)
    }

    async fn update_card(&self, code: &str, expiration_date: NaiveDate) -> Result<(), EycaError> {
        let req = UpdateCardRequest {
            username: self.username.clone(),
            password: self.password.clone(),
            format: "json".into(),
            ccdb_number: code.to_string(),
            card_date_expiration: expiration_date.format("%Y-%m-%d").to_string(),
        };
        self.post("update_card", &req).await.map(|_| ())
    }
}
