use keychain_types::{ErrorCode, StructuredError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("webauthn is not supported on this platform")]
    WebauthnUnsupported,

    #[error("authenticator timed out after {0:?}")]
    Timeout(Duration),

    #[error("user cancelled the signing request")]
    UserCancelled,

    #[error("authenticator error: {0}")]
    Authenticator(String),

    #[error("invalid DER signature: {0}")]
    InvalidSignature(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("malformed assertion: {0}")]
    MalformedAssertion(String),

    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("stark signing failed: {0}")]
    Signing(String),

    #[error("external wallet error: {0}")]
    Wallet(String),

    #[error("password required for this credential")]
    PasswordRequired,

    #[error("password does not match the stored credential")]
    WrongPassword,

    #[error("invalid typed data: {0}")]
    InvalidTypedData(String),

    #[error("chain id is not a short string: {0}")]
    InvalidChainId(String),
}

impl SignerError {
    /// Timeouts and cancellations can be retried by asking the user again
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignerError::Timeout(_) | SignerError::UserCancelled)
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            SignerError::WebauthnUnsupported => ErrorCode::WebauthnUnsupported,
            SignerError::Timeout(_) => ErrorCode::Timeout,
            SignerError::UserCancelled => ErrorCode::UserCancelled,
            SignerError::InvalidTypedData(_) | SignerError::InvalidChainId(_) => {
                ErrorCode::InvalidRequest
            }
            _ => ErrorCode::Internal,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError::new(self.error_code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors_are_distinguishable() {
        let timeout = SignerError::Timeout(Duration::from_secs(60));
        assert!(timeout.is_retryable());
        assert!(SignerError::UserCancelled.is_retryable());
        assert!(!SignerError::WebauthnUnsupported.is_retryable());

        assert_eq!(timeout.error_code(), ErrorCode::Timeout);
        assert_eq!(SignerError::UserCancelled.error_code(), ErrorCode::UserCancelled);
        assert_ne!(timeout.error_code(), SignerError::UserCancelled.error_code());
    }
}
