use keychain_types::{parse_error_data, ErrorCode, StructuredError};
use serde_json::Value;
use thiserror::Error;

/// Starknet JSON-RPC error codes the controller reacts to
pub mod rpc_codes {
    pub const CONTRACT_NOT_FOUND: i64 = 20;
    pub const TXN_HASH_NOT_FOUND: i64 = 29;
    pub const CONTRACT_ERROR: i64 = 40;
    pub const TRANSACTION_EXECUTION_ERROR: i64 = 41;
    pub const INVALID_TRANSACTION_NONCE: i64 = 52;
    pub const INSUFFICIENT_MAX_FEE: i64 = 53;
    pub const INSUFFICIENT_ACCOUNT_BALANCE: i64 = 54;
    pub const VALIDATION_FAILURE: i64 = 55;
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::ConnectionFailed(_) | ProviderError::Timeout(_)
        )
    }

    pub fn error_code(&self) -> ErrorCode {
        use rpc_codes::*;
        match self {
            ProviderError::ConnectionFailed(_) | ProviderError::Timeout(_) => {
                ErrorCode::NetworkError
            }
            ProviderError::Rpc { code, .. } => match *code {
                VALIDATION_FAILURE
                | INVALID_TRANSACTION_NONCE
                | INSUFFICIENT_MAX_FEE
                | INSUFFICIENT_ACCOUNT_BALANCE => ErrorCode::ValidationFailure,
                CONTRACT_ERROR | TRANSACTION_EXECUTION_ERROR => ErrorCode::ExecutionReverted,
                _ => ErrorCode::Internal,
            },
            ProviderError::InvalidResponse(_) => ErrorCode::Internal,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        let error = StructuredError::new(self.error_code(), self.to_string());
        match self {
            ProviderError::Rpc {
                data: Some(Value::String(raw)),
                ..
            } => error.with_raw_data(raw),
            ProviderError::Rpc {
                data: Some(data), ..
            } => error.with_data(data.clone()),
            _ => error,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::ConnectionFailed(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymasterError {
    /// The relay does not sponsor this account, chain or call batch
    #[error("paymaster unsupported: {0}")]
    Unsupported(String),

    #[error("paymaster rejected execution: {message}")]
    Rejected {
        message: String,
        data: Option<String>,
    },

    #[error("paymaster network error: {0}")]
    Network(String),
}

impl PaymasterError {
    pub fn to_structured(&self) -> StructuredError {
        match self {
            PaymasterError::Unsupported(message) => {
                StructuredError::new(ErrorCode::PaymasterUnsupported, message.clone())
            }
            PaymasterError::Rejected { message, data } => {
                let error = StructuredError::new(ErrorCode::ValidationFailure, message.clone());
                match data {
                    Some(raw) => error.with_raw_data(raw),
                    None => error,
                }
            }
            PaymasterError::Network(message) => {
                StructuredError::new(ErrorCode::NetworkError, message.clone())
                    .with_data(parse_error_data(message))
            }
        }
    }
}

impl From<reqwest::Error> for PaymasterError {
    fn from(err: reqwest::Error) -> Self {
        PaymasterError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    RequestFailed(String),

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: i64, data: Option<Value>) -> ProviderError {
        ProviderError::Rpc {
            code,
            message: "boom".to_string(),
            data,
        }
    }

    #[test]
    fn test_rpc_code_classification() {
        assert_eq!(rpc(55, None).error_code(), ErrorCode::ValidationFailure);
        assert_eq!(rpc(52, None).error_code(), ErrorCode::ValidationFailure);
        assert_eq!(rpc(41, None).error_code(), ErrorCode::ExecutionReverted);
        assert_eq!(
            ProviderError::ConnectionFailed("x".into()).error_code(),
            ErrorCode::NetworkError
        );
    }

    #[test]
    fn test_structured_data_shapes() {
        let parsed = rpc(41, Some(Value::String(r#"{"revert_error":"nope"}"#.into())))
            .to_structured();
        assert_eq!(parsed.data.unwrap()["revert_error"], "nope");

        let raw = rpc(41, Some(Value::String("plain text".into()))).to_structured();
        assert_eq!(raw.data.unwrap()["raw"], "plain text");

        let object = rpc(55, Some(serde_json::json!({"reason": "sig"}))).to_structured();
        assert_eq!(object.data.unwrap()["reason"], "sig");
    }

    #[test]
    fn test_paymaster_rejection_structured() {
        let err = PaymasterError::Rejected {
            message: "execution failed".into(),
            data: Some("not json".into()),
        };
        let structured = err.to_structured();
        assert_eq!(structured.code, ErrorCode::ValidationFailure);
        assert_eq!(structured.data.unwrap()["raw"], "not json");
    }
}
