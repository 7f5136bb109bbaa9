use keychain_account::AccountError;
use keychain_provider::{PaymasterError, ProviderError};
use keychain_session::SessionError;
use keychain_signer::SignerError;
use keychain_types::{CallError, ErrorCode, StructuredError};
use thiserror::Error;

/// Execution errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid call: {0}")]
    InvalidCall(#[from] CallError),

    #[error("empty call batch")]
    EmptyBatch,

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("signing failed: {0}")]
    Signer(#[from] SignerError),

    #[error("chain error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Paymaster(PaymasterError),

    #[error("fee estimation returned {got} estimates, expected {expected}")]
    FeeEstimate { expected: usize, got: usize },
}

impl ExecutionError {
    pub fn error_code(&self) -> ErrorCode {
        self.to_structured().code
    }

    /// Normalize to the `{code, message, data}` shape shown to the app
    pub fn to_structured(&self) -> StructuredError {
        match self {
            ExecutionError::InvalidCall(_) | ExecutionError::EmptyBatch => {
                StructuredError::new(ErrorCode::InvalidRequest, self.to_string())
            }
            ExecutionError::Account(e) => e.to_structured(),
            ExecutionError::Signer(e) => e.to_structured(),
            ExecutionError::Provider(e) => e.to_structured(),
            ExecutionError::Paymaster(e) => e.to_structured(),
            ExecutionError::Session(_) | ExecutionError::FeeEstimate { .. } => {
                StructuredError::new(ErrorCode::Internal, self.to_string())
            }
        }
    }
}
