use keychain_account::AccountError;
use keychain_callbacks::{ApprovalError, CallbackError};
use keychain_config::ConfigError;
use keychain_executor::ExecutionError;
use keychain_provider::{BackendError, ProviderError};
use keychain_session::SessionError;
use keychain_signer::SignerError;
use keychain_store::StoreError;
use keychain_types::{CredentialKind, ErrorCode, StructuredError};
use thiserror::Error;

/// Errors surfaced by the [`Controller`](crate::Controller)
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no account connected")]
    NotConnected,

    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("account uses a {actual} credential, {requested} was requested")]
    CredentialMismatch {
        requested: CredentialKind,
        actual: CredentialKind,
    },

    #[error("no pending execution to resume")]
    NothingToResume,

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("chain error: {0}")]
    Provider(#[from] ProviderError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl ControllerError {
    pub fn error_code(&self) -> ErrorCode {
        self.to_structured().code
    }

    /// Normalize to the `{code, message, data}` shape shown to the app
    pub fn to_structured(&self) -> StructuredError {
        match self {
            ControllerError::Account(e) => e.to_structured(),
            ControllerError::Execution(e) => e.to_structured(),
            ControllerError::Signer(e) => e.to_structured(),
            ControllerError::Provider(e) => e.to_structured(),
            ControllerError::Callback(e) => e.to_structured(),
            ControllerError::Approval(e) => e.to_structured(),
            ControllerError::Backend(_) => {
                StructuredError::new(ErrorCode::NetworkError, self.to_string())
            }
            ControllerError::NotConnected
            | ControllerError::AccountNotFound(_)
            | ControllerError::CredentialMismatch { .. }
            | ControllerError::NothingToResume
            | ControllerError::UnknownChain(_) => {
                StructuredError::new(ErrorCode::InvalidRequest, self.to_string())
            }
            ControllerError::Session(_) | ControllerError::Store(_) | ControllerError::Config(_) => {
                StructuredError::new(ErrorCode::Internal, self.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_nested_codes_survive() {
        let err = ControllerError::from(SignerError::Timeout(Duration::from_secs(60)));
        assert_eq!(err.error_code(), ErrorCode::Timeout);
        assert!(err.error_code().is_retryable());

        let err = ControllerError::from(ApprovalError::Expired("abc".into()));
        assert_eq!(err.error_code(), ErrorCode::Timeout);
    }

    #[test]
    fn test_caller_mistakes_are_invalid_requests() {
        assert_eq!(
            ControllerError::NotConnected.error_code(),
            ErrorCode::InvalidRequest
        );
        let err = ControllerError::CredentialMismatch {
            requested: CredentialKind::Password,
            actual: CredentialKind::Webauthn,
        };
        assert_eq!(
            err.to_string(),
            "account uses a webauthn credential, password was requested"
        );
    }
}
