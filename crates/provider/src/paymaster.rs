use async_trait::async_trait;
use keychain_types::{Felt, OutsideExecution};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{rpc_codes, PaymasterError};

/// Relay that sponsors gas for a signed outside execution
#[async_trait]
pub trait Paymaster: Send + Sync {
    /// Submit a signed outside execution; returns the relayed tx hash.
    /// `PaymasterError::Unsupported` means the caller should pay its own fee.
    async fn execute_outside(
        &self,
        address: Felt,
        chain_id: &str,
        outside_execution: &OutsideExecution,
        signature: &[Felt],
    ) -> Result<Felt, PaymasterError>;
}

/// Paymaster speaking `cartridge_addExecuteOutsideTransaction`
pub struct HttpPaymaster {
    url: String,
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpPaymaster {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn outside_execution_json(outside: &OutsideExecution) -> Value {
    let calls: Vec<Value> = outside
        .calls
        .iter()
        .map(|call| {
            json!({
                "to": call.contract_address,
                "selector": call.selector(),
                "calldata": call.calldata,
            })
        })
        .collect();

    json!({
        "caller": outside.caller,
        "nonce": outside.nonce,
        "execute_after": Felt::from_u64(outside.execute_after),
        "execute_before": Felt::from_u64(outside.execute_before),
        "calls": calls,
    })
}

/// Classify a relay error: a missing method or an explicit "not supported"
/// message means sponsorship is unavailable, not that the execution failed.
fn classify_error(code: i64, message: String, data: Option<Value>) -> PaymasterError {
    let lowered = message.to_lowercase();
    if code == rpc_codes::METHOD_NOT_FOUND
        || lowered.contains("not supported")
        || lowered.contains("unsupported")
    {
        return PaymasterError::Unsupported(message);
    }

    let data = data.map(|value| match value {
        Value::String(raw) => raw,
        other => other.to_string(),
    });
    PaymasterError::Rejected { message, data }
}

#[async_trait]
impl Paymaster for HttpPaymaster {
    async fn execute_outside(
        &self,
        address: Felt,
        chain_id: &str,
        outside_execution: &OutsideExecution,
        signature: &[Felt],
    ) -> Result<Felt, PaymasterError> {
        #[derive(Deserialize)]
        struct RelayResponse {
            #[serde(default)]
            result: Option<RelayResult>,
            #[serde(default)]
            error: Option<RelayError>,
        }

        #[derive(Deserialize)]
        struct RelayResult {
            transaction_hash: Felt,
        }

        #[derive(Deserialize)]
        struct RelayError {
            code: i64,
            message: String,
            #[serde(default)]
            data: Option<Value>,
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "cartridge_addExecuteOutsideTransaction",
            "params": {
                "address": address,
                "chain_id": chain_id,
                "outside_execution": outside_execution_json(outside_execution),
                "signature": signature,
            },
        });

        debug!(address = %address, chain_id, "submitting outside execution to paymaster");

        let response = self
            .http_client
            .post(&self.url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(PaymasterError::Unsupported(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PaymasterError::Network(format!("HTTP {status}: {text}")));
        }

        let parsed: RelayResponse = response.json().await?;
        if let Some(error) = parsed.error {
            return Err(classify_error(error.code, error.message, error.data));
        }

        parsed
            .result
            .map(|r| r.transaction_hash)
            .ok_or_else(|| PaymasterError::Network("paymaster returned no result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keychain_types::Call;

    #[test]
    fn test_classify_unsupported() {
        assert!(matches!(
            classify_error(-32601, "Method not found".into(), None),
            PaymasterError::Unsupported(_)
        ));
        assert!(matches!(
            classify_error(1, "Chain not supported".into(), None),
            PaymasterError::Unsupported(_)
        ));
    }

    #[test]
    fn test_classify_rejection_keeps_data() {
        let err = classify_error(
            41,
            "Execution failed".into(),
            Some(json!({"execution_error": "insufficient balance"})),
        );
        match err {
            PaymasterError::Rejected { data: Some(data), .. } => {
                assert!(data.contains("insufficient balance"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outside_execution_wire_shape() {
        let outside = OutsideExecution {
            caller: OutsideExecution::any_caller(),
            nonce: Felt::from_u64(9),
            execute_after: 0,
            execute_before: 600,
            calls: vec![Call::new("0xabc", "transfer", ["0x1"]).normalize().unwrap()],
        };
        let json = outside_execution_json(&outside);
        assert_eq!(json["execute_before"], "0x258");
        assert_eq!(json["calls"][0]["calldata"][0], "0x1");
        assert_eq!(
            json["calls"][0]["selector"],
            serde_json::to_value(outside.calls[0].selector()).unwrap()
        );
    }
}
