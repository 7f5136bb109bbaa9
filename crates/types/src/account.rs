use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Credential, Felt, InvokeTransaction};

/// Deployment / registration status of an account on one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Address derived from constructor params, nothing on chain yet
    Counterfactual,
    Deploying,
    Deployed,
    Registering,
    Registered,
    /// Registration invocation signed and cached, not yet broadcast
    PendingRegister,
}

impl AccountStatus {
    pub fn is_deployed(&self) -> bool {
        !matches!(self, AccountStatus::Counterfactual | AccountStatus::Deploying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Counterfactual => "COUNTERFACTUAL",
            AccountStatus::Deploying => "DEPLOYING",
            AccountStatus::Deployed => "DEPLOYED",
            AccountStatus::Registering => "REGISTERING",
            AccountStatus::Registered => "REGISTERED",
            AccountStatus::PendingRegister => "PENDING_REGISTER",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account identity, stored under `@account/<address>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub address: Felt,
    pub username: String,
    pub credential: Credential,
}

/// Per-chain deployment state, stored under `@deployment/<address>/<chainId>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_hash: Option<Felt>,
    /// False when the deployed class hash is not the latest known version
    #[serde(default = "default_updated")]
    pub updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_tx_hash: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_tx_hash: Option<Felt>,
}

fn default_updated() -> bool {
    true
}

impl Default for DeploymentRecord {
    fn default() -> Self {
        Self {
            status: AccountStatus::Counterfactual,
            class_hash: None,
            updated: true,
            deploy_tx_hash: None,
            registration_tx_hash: None,
        }
    }
}

/// Signed "add plugin key" invocation waiting to ride along with the next
/// user transaction. Stored under `@register/<address>/<chainId>/set_public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistration {
    pub transaction: InvokeTransaction,
    pub public_key: Felt,
    pub created_at: u64,
}

impl PendingRegistration {
    pub fn nonce(&self) -> u64 {
        self.transaction.nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&AccountStatus::PendingRegister).unwrap(),
            "\"PENDING_REGISTER\""
        );
        assert_eq!(AccountStatus::Counterfactual.to_string(), "COUNTERFACTUAL");
    }

    #[test]
    fn test_is_deployed() {
        assert!(!AccountStatus::Counterfactual.is_deployed());
        assert!(!AccountStatus::Deploying.is_deployed());
        assert!(AccountStatus::Deployed.is_deployed());
        assert!(AccountStatus::PendingRegister.is_deployed());
    }

    #[test]
    fn test_deployment_record_defaults() {
        let record: DeploymentRecord = serde_json::from_str(r#"{"status":"DEPLOYED"}"#).unwrap();
        assert!(record.updated);
        assert!(record.class_hash.is_none());
    }
}
