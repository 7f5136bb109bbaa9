use keychain_types::{Felt, InvokeTransaction, OutsideExecution};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use starknet_crypto::Felt as FieldElement;

use crate::error::SignerError;
use crate::stark::{from_field, pedersen_on_elements, to_field};
use crate::typed_data;

/// Chain-specific message hashing (transaction hash, SNIP-9 outside
/// execution hash, SNIP-12 typed data hash). Injected so the controller
/// does not hard-code one chain's hash functions.
pub trait ChainHasher: Send + Sync {
    fn invoke_hash(&self, transaction: &InvokeTransaction) -> Result<Felt, SignerError>;

    fn outside_execution_hash(
        &self,
        outside_execution: &OutsideExecution,
        address: Felt,
        chain_id: &str,
    ) -> Result<Felt, SignerError>;

    fn typed_data_hash(&self, typed_data: &Value, address: Felt) -> Result<Felt, SignerError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// STARKNET
// ═══════════════════════════════════════════════════════════════════════════

/// 2^128, added to the version of fee-estimation-only transactions
fn query_version_offset() -> FieldElement {
    let mut bytes = [0u8; 32];
    bytes[15] = 1;
    FieldElement::from_bytes_be(&bytes)
}

/// Chain ids are short strings (`SN_MAIN`) or their hex encoding
pub fn chain_id_felt(chain_id: &str) -> Result<Felt, SignerError> {
    if chain_id.starts_with("0x") {
        return Felt::from_hex(chain_id).map_err(|_| SignerError::InvalidChainId(chain_id.to_string()));
    }
    Felt::from_short_string(chain_id).map_err(|_| SignerError::InvalidChainId(chain_id.to_string()))
}

/// Starknet hashes: Pedersen invoke v1 transaction hash, SNIP-9 v2
/// outside execution and SNIP-12 typed data
#[derive(Debug, Clone, Copy, Default)]
pub struct StarknetHasher;

impl StarknetHasher {
    fn outside_execution_typed_data(
        outside_execution: &OutsideExecution,
        chain_id: Felt,
    ) -> Value {
        let calls: Vec<Value> = outside_execution
            .calls
            .iter()
            .map(|call| {
                json!({
                    "To": call.contract_address.to_hex(),
                    "Selector": call.selector().to_hex(),
                    "Calldata": call.calldata.iter().map(Felt::to_hex).collect::<Vec<_>>(),
                })
            })
            .collect();

        json!({
            "types": {
                "StarknetDomain": [
                    { "name": "name", "type": "shortstring" },
                    { "name": "version", "type": "shortstring" },
                    { "name": "chainId", "type": "shortstring" },
                    { "name": "revision", "type": "shortstring" }
                ],
                "OutsideExecution": [
                    { "name": "Caller", "type": "ContractAddress" },
                    { "name": "Nonce", "type": "felt" },
                    { "name": "Execute After", "type": "u128" },
                    { "name": "Execute Before", "type": "u128" },
                    { "name": "Calls", "type": "Call*" }
                ],
                "Call": [
                    { "name": "To", "type": "ContractAddress" },
                    { "name": "Selector", "type": "selector" },
                    { "name": "Calldata", "type": "felt*" }
                ]
            },
            "primaryType": "OutsideExecution",
            "domain": {
                "name": "Account.execute_from_outside",
                "version": 2,
                "chainId": chain_id.to_hex(),
                "revision": 1
            },
            "message": {
                "Caller": outside_execution.caller.to_hex(),
                "Nonce": outside_execution.nonce.to_hex(),
                "Execute After": outside_execution.execute_after,
                "Execute Before": outside_execution.execute_before,
                "Calls": calls,
            }
        })
    }
}

impl ChainHasher for StarknetHasher {
    fn invoke_hash(&self, transaction: &InvokeTransaction) -> Result<Felt, SignerError> {
        let mut version = FieldElement::from(transaction.version);
        if transaction.is_query {
            version = version + query_version_offset();
        }
        let calldata: Vec<FieldElement> = transaction.calldata.iter().map(to_field).collect();
        let prefix = Felt::from_short_string("invoke")
            .map_err(|e| SignerError::InvalidChainId(e.to_string()))?;

        let elements = [
            to_field(&prefix),
            version,
            to_field(&transaction.sender_address),
            FieldElement::ZERO,
            pedersen_on_elements(&calldata),
            to_field(&transaction.max_fee),
            to_field(&chain_id_felt(&transaction.chain_id)?),
            FieldElement::from(transaction.nonce),
        ];
        Ok(from_field(&pedersen_on_elements(&elements)))
    }

    fn outside_execution_hash(
        &self,
        outside_execution: &OutsideExecution,
        address: Felt,
        chain_id: &str,
    ) -> Result<Felt, SignerError> {
        let typed_data =
            Self::outside_execution_typed_data(outside_execution, chain_id_felt(chain_id)?);
        typed_data::typed_data_hash(&typed_data, address)
    }

    fn typed_data_hash(&self, typed_data: &Value, address: Felt) -> Result<Felt, SignerError> {
        typed_data::typed_data_hash(typed_data, address)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK
// ═══════════════════════════════════════════════════════════════════════════

/// Deterministic SHA-256 based hasher for tests
#[derive(Debug, Clone, Copy, Default)]
pub struct MockHasher;

impl MockHasher {
    fn digest(domain: &str, parts: &[&[u8]]) -> Felt {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        let bytes: [u8; 32] = hasher.finalize().into();
        Felt::from_bytes_be(bytes).mask_bits(250)
    }
}

impl ChainHasher for MockHasher {
    fn invoke_hash(&self, transaction: &InvokeTransaction) -> Result<Felt, SignerError> {
        let mut unsigned = transaction.clone();
        unsigned.signature.clear();
        let encoded = serde_json::to_vec(&unsigned).unwrap_or_default();
        Ok(Self::digest("invoke", &[&encoded]))
    }

    fn outside_execution_hash(
        &self,
        outside_execution: &OutsideExecution,
        address: Felt,
        chain_id: &str,
    ) -> Result<Felt, SignerError> {
        let encoded = serde_json::to_vec(outside_execution).unwrap_or_default();
        Ok(Self::digest(
            "outside_execution",
            &[&encoded, address.as_bytes(), chain_id.as_bytes()],
        ))
    }

    fn typed_data_hash(&self, typed_data: &Value, address: Felt) -> Result<Felt, SignerError> {
        for field in ["types", "primaryType", "domain", "message"] {
            if typed_data.get(field).is_none() {
                return Err(SignerError::InvalidTypedData(format!("missing `{field}`")));
            }
        }
        let encoded = serde_json::to_vec(typed_data)
            .map_err(|e| SignerError::InvalidTypedData(e.to_string()))?;
        Ok(Self::digest("typed_data", &[&encoded, address.as_bytes()]))
    }
}
