use async_trait::async_trait;
use keychain_types::{AccountRecord, Felt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Deploy transaction the backend submitted on the account's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTransaction {
    pub transaction_hash: Felt,
    pub status: DeployStatus,
}

/// Account lookup and deployment service
#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn account(&self, username: &str) -> Result<Option<AccountRecord>, BackendError>;

    /// Deploy transaction correlated with `address` on `chain_id`, if any
    async fn deploy_transaction(
        &self,
        address: Felt,
        chain_id: &str,
    ) -> Result<Option<DeployTransaction>, BackendError>;

    /// Ask the backend to deploy the counterfactual account
    async fn deploy_account(&self, address: Felt, chain_id: &str) -> Result<Felt, BackendError>;
}

/// REST/JSON backend client
pub struct HttpBackend {
    base_url: String,
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET returning `None` on 404
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, BackendError> {
        let url = self.endpoint(path);
        debug!(url = %url, "backend request");

        let response = self
            .http_client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Some(response.json().await?))
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn account(&self, username: &str) -> Result<Option<AccountRecord>, BackendError> {
        self.get_optional(&format!("/accounts/{username}")).await
    }

    async fn deploy_transaction(
        &self,
        address: Felt,
        chain_id: &str,
    ) -> Result<Option<DeployTransaction>, BackendError> {
        self.get_optional(&format!(
            "/accounts/{}/deployments/{chain_id}",
            address.to_fixed_hex()
        ))
        .await
    }

    async fn deploy_account(&self, address: Felt, chain_id: &str) -> Result<Felt, BackendError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct DeployResponse {
            transaction_hash: Felt,
        }

        let url = self.endpoint(&format!("/accounts/{}/deploy", address.to_fixed_hex()));
        let response = self
            .http_client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&json!({ "chainId": chain_id }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let deployed: DeployResponse = response.json().await?;
        Ok(deployed.transaction_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_transaction_wire_shape() {
        let parsed: DeployTransaction =
            serde_json::from_str(r#"{"transactionHash":"0x12","status":"PENDING"}"#).unwrap();
        assert_eq!(parsed.status, DeployStatus::Pending);
        assert_eq!(parsed.transaction_hash, Felt::from_u64(0x12));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let backend = HttpBackend::new("https://api.example/");
        assert_eq!(backend.endpoint("/accounts/bob"), "https://api.example/accounts/bob");
    }
}
