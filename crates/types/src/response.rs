use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Call, Felt};

/// Top-level outcome code returned to the embedding app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Success,
    NotConnected,
    UserInteractionRequired,
    Cancelled,
    Error,
}

/// Error taxonomy shared by every layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UserCancelled,
    /// Rejected before inclusion
    ValidationFailure,
    /// Included but reverted
    ExecutionReverted,
    /// Internal signal only, triggers the self-paid fallback
    PaymasterUnsupported,
    AccountNotDeployed,
    NetworkError,
    WebauthnUnsupported,
    Timeout,
    InvalidRequest,
    Internal,
}

impl ErrorCode {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError | ErrorCode::Timeout | ErrorCode::UserCancelled
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::AccountNotDeployed | ErrorCode::WebauthnUnsupported
        )
    }
}

/// Normalized `{code, message, data}` error shape
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach raw error data, parsed as JSON when possible
    pub fn with_raw_data(mut self, raw: &str) -> Self {
        self.data = Some(parse_error_data(raw));
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Parse chain/paymaster error data. Non-JSON payloads are wrapped as
/// `{"raw": "..."}` so consumers always see an object or JSON value.
pub fn parse_error_data(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "raw": raw }))
}

/// Response to `execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub code: ResponseCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    /// Exact batch to replay once the user has confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<Call>>,
}

impl ExecuteResponse {
    pub fn success(transaction_hash: Felt) -> Self {
        Self {
            code: ResponseCode::Success,
            transaction_hash: Some(transaction_hash),
            error: None,
            calls: None,
        }
    }

    pub fn user_interaction_required(calls: Vec<Call>) -> Self {
        Self {
            code: ResponseCode::UserInteractionRequired,
            transaction_hash: None,
            error: None,
            calls: Some(calls),
        }
    }

    pub fn not_connected() -> Self {
        Self {
            code: ResponseCode::NotConnected,
            transaction_hash: None,
            error: None,
            calls: None,
        }
    }

    pub fn error(error: StructuredError) -> Self {
        Self {
            code: ResponseCode::Error,
            transaction_hash: None,
            error: Some(error),
            calls: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_data_json() {
        let data = parse_error_data(r#"{"execution_error":"u256_sub Overflow"}"#);
        assert_eq!(data["execution_error"], "u256_sub Overflow");
    }

    #[test]
    fn test_parse_error_data_raw() {
        let data = parse_error_data("connection reset");
        assert_eq!(data, serde_json::json!({ "raw": "connection reset" }));
    }

    #[test]
    fn test_response_wire_shape() {
        let response = ExecuteResponse::success(Felt::from_u64(0xbeef));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["code"], "SUCCESS");
        assert_eq!(json["transaction_hash"], "0xbeef");
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(ExecuteResponse::user_interaction_required(vec![])).unwrap();
        assert_eq!(json["code"], "USER_INTERACTION_REQUIRED");
    }

    #[test]
    fn test_error_code_classes() {
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(!ErrorCode::AccountNotDeployed.is_retryable());
        assert!(ErrorCode::AccountNotDeployed.is_fatal());
    }
}
