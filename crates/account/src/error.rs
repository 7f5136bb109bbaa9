use keychain_provider::{BackendError, ProviderError};
use keychain_store::StoreError;
use keychain_types::{ErrorCode, Felt, StructuredError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account {address} is not deployed on {chain_id}")]
    NotDeployed { address: Felt, chain_id: String },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl AccountError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AccountError::NotDeployed { .. } => ErrorCode::AccountNotDeployed,
            AccountError::Provider(e) => e.error_code(),
            AccountError::Backend(_) => ErrorCode::NetworkError,
            AccountError::Store(_) => ErrorCode::Internal,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        match self {
            AccountError::Provider(e) => e.to_structured(),
            other => StructuredError::new(other.error_code(), other.to_string()),
        }
    }
}
