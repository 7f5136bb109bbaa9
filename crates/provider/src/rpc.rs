use async_trait::async_trait;
use keychain_types::{FeeEstimate, Felt, InvokeTransaction, NormalizedCall};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::chain::{ChainProvider, TransactionReceipt, TxStatus};
use crate::error::{rpc_codes, ProviderError};

const PENDING_BLOCK: &str = "pending";

/// Starknet JSON-RPC 2.0 client
pub struct JsonRpcProvider {
    rpc_url: String,
    http_client: reqwest::Client,
    request_timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcFeeEstimate {
    gas_consumed: Felt,
    gas_price: Felt,
    overall_fee: Felt,
}

#[derive(Debug, Deserialize)]
struct RpcReceipt {
    transaction_hash: Felt,
    #[serde(default)]
    finality_status: Option<String>,
    #[serde(default)]
    execution_status: Option<String>,
    #[serde(default)]
    revert_reason: Option<String>,
}

impl JsonRpcProvider {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            http_client: reqwest::Client::new(),
            request_timeout: Duration::from_secs(10),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "rpc request");

        let response = self
            .http_client
            .post(&self.rpc_url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ConnectionFailed(format!("HTTP {status}: {text}")));
        }

        let parsed: RpcResponse = response.json().await?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        let result = parsed
            .result
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{method}: missing result")))?;
        serde_json::from_value(result)
            .map_err(|e| ProviderError::InvalidResponse(format!("{method}: {e}")))
    }

    /// Retry once on transient failures. Only used for reads.
    async fn with_retry<F, T, Fut>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        match operation().await {
            Err(e) if e.is_transient() => {
                warn!(rpc_url = %self.rpc_url, error = %e, "rpc read failed, retrying once");
                operation().await
            }
            other => other,
        }
    }
}

/// Wire form of an invoke v1 transaction
fn invoke_json(tx: &InvokeTransaction) -> Value {
    json!({
        "type": "INVOKE",
        "version": invoke_version(tx),
        "sender_address": tx.sender_address,
        "calldata": tx.calldata,
        "max_fee": tx.max_fee,
        "signature": tx.signature,
        "nonce": Felt::from_u64(tx.nonce),
    })
}

/// Query transactions carry the version offset by 2^128 so they can never
/// be replayed as real transactions.
fn invoke_version(tx: &InvokeTransaction) -> Felt {
    if tx.is_query {
        let mut bytes = [0u8; 32];
        bytes[15] = 1;
        bytes[24..].copy_from_slice(&tx.version.to_be_bytes());
        Felt::from_bytes_be(bytes)
    } else {
        Felt::from_u64(tx.version)
    }
}

/// Decode a hex chain id into its short-string form when printable
pub fn decode_chain_id(raw: &str) -> String {
    let Ok(felt) = raw.parse::<Felt>() else {
        return raw.to_string();
    };
    let bytes: Vec<u8> = felt
        .to_bytes_be()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect();
    if !bytes.is_empty() && bytes.iter().all(|b| b.is_ascii_graphic()) {
        String::from_utf8(bytes).unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    }
}

fn receipt_status(receipt: &RpcReceipt) -> TxStatus {
    let reason = || receipt.revert_reason.clone().unwrap_or_default();
    match receipt.execution_status.as_deref() {
        Some("REVERTED") => return TxStatus::Reverted { reason: reason() },
        Some("REJECTED") => return TxStatus::Rejected { reason: reason() },
        _ => {}
    }
    match receipt.finality_status.as_deref() {
        Some("ACCEPTED_ON_L2") => TxStatus::AcceptedOnL2,
        Some("ACCEPTED_ON_L1") => TxStatus::AcceptedOnL1,
        Some("REJECTED") => TxStatus::Rejected { reason: reason() },
        _ => TxStatus::Received,
    }
}

fn felt_to_u128(value: Felt, field: &str) -> Result<u128, ProviderError> {
    value
        .to_u128()
        .ok_or_else(|| ProviderError::InvalidResponse(format!("{field} overflows u128")))
}

#[async_trait]
impl ChainProvider for JsonRpcProvider {
    async fn chain_id(&self) -> Result<String, ProviderError> {
        let raw: String = self
            .with_retry(|| self.request("starknet_chainId", json!([])))
            .await?;
        Ok(decode_chain_id(&raw))
    }

    async fn get_class_hash_at(&self, address: Felt) -> Result<Option<Felt>, ProviderError> {
        let params = json!({ "block_id": PENDING_BLOCK, "contract_address": address });
        match self
            .with_retry(|| self.request::<Felt>("starknet_getClassHashAt", params.clone()))
            .await
        {
            Ok(hash) => Ok(Some(hash)),
            Err(ProviderError::Rpc { code, .. }) if code == rpc_codes::CONTRACT_NOT_FOUND => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn call(&self, call: &NormalizedCall) -> Result<Vec<Felt>, ProviderError> {
        let params = json!({
            "request": {
                "contract_address": call.contract_address,
                "entry_point_selector": call.selector(),
                "calldata": call.calldata,
            },
            "block_id": PENDING_BLOCK,
        });
        self.with_retry(|| self.request("starknet_call", params.clone()))
            .await
    }

    async fn get_nonce(&self, address: Felt) -> Result<u64, ProviderError> {
        let params = json!({ "block_id": PENDING_BLOCK, "contract_address": address });
        let nonce: Felt = self
            .with_retry(|| self.request("starknet_getNonce", params.clone()))
            .await?;
        nonce
            .to_u64()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("nonce out of range: {nonce}")))
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        let params = json!({ "transaction_hash": transaction_hash });
        match self
            .request::<RpcReceipt>("starknet_getTransactionReceipt", params)
            .await
        {
            Ok(receipt) => Ok(Some(TransactionReceipt {
                transaction_hash: receipt.transaction_hash,
                status: receipt_status(&receipt),
            })),
            Err(ProviderError::Rpc { code, .. }) if code == rpc_codes::TXN_HASH_NOT_FOUND => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn estimate_fee(
        &self,
        transactions: &[InvokeTransaction],
    ) -> Result<Vec<FeeEstimate>, ProviderError> {
        let request: Vec<Value> = transactions.iter().map(invoke_json).collect();
        // estimates are requested unsigned so the user is prompted only once
        let params = json!({
            "request": request,
            "simulation_flags": ["SKIP_VALIDATE"],
            "block_id": PENDING_BLOCK,
        });
        let estimates: Vec<RpcFeeEstimate> = self
            .with_retry(|| self.request("starknet_estimateFee", params.clone()))
            .await?;

        estimates
            .into_iter()
            .map(|e| {
                Ok(FeeEstimate {
                    gas_consumed: e.gas_consumed.to_u64().unwrap_or(u64::MAX),
                    gas_price: felt_to_u128(e.gas_price, "gas_price")?,
                    overall_fee: felt_to_u128(e.overall_fee, "overall_fee")?,
                })
            })
            .collect()
    }

    async fn add_invoke_transaction(
        &self,
        transaction: &InvokeTransaction,
    ) -> Result<Felt, ProviderError> {
        #[derive(Deserialize)]
        struct AddInvokeResult {
            transaction_hash: Felt,
        }

        let params = json!({ "invoke_transaction": invoke_json(transaction) });
        let result: AddInvokeResult = self
            .request("starknet_addInvokeTransaction", params)
            .await?;
        Ok(result.transaction_hash)
    }
}
