use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::str::FromStr;
use thiserror::Error;

use crate::{Felt, FeltError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("invalid contract address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid calldata at index {index} ({value}): {reason}")]
    InvalidCalldata {
        index: usize,
        value: String,
        reason: String,
    },

    #[error("entrypoint must not be empty")]
    EmptyEntrypoint,
}

/// A contract call as supplied by the embedding app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub contract_address: String,
    pub entrypoint: String,
    #[serde(default)]
    pub calldata: Vec<String>,
}

impl Call {
    pub fn new<S: Into<String>>(
        contract_address: impl Into<String>,
        entrypoint: impl Into<String>,
        calldata: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            contract_address: contract_address.into(),
            entrypoint: entrypoint.into(),
            calldata: calldata.into_iter().map(Into::into).collect(),
        }
    }

    /// Pad the address to canonical width and coerce calldata to field elements
    pub fn normalize(&self) -> Result<NormalizedCall, CallError> {
        if self.entrypoint.trim().is_empty() {
            return Err(CallError::EmptyEntrypoint);
        }

        let contract_address =
            parse_address(&self.contract_address).map_err(|e| CallError::InvalidAddress {
                address: self.contract_address.clone(),
                reason: e.to_string(),
            })?;

        let calldata = self
            .calldata
            .iter()
            .enumerate()
            .map(|(index, value)| {
                Felt::from_str(value).map_err(|e| CallError::InvalidCalldata {
                    index,
                    value: value.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NormalizedCall {
            contract_address,
            entrypoint: self.entrypoint.trim().to_string(),
            calldata,
        })
    }
}

/// A call whose address and calldata are canonical field elements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedCall {
    pub contract_address: Felt,
    pub entrypoint: String,
    pub calldata: Vec<Felt>,
}

impl NormalizedCall {
    pub fn selector(&self) -> Felt {
        get_selector_from_name(&self.entrypoint)
    }
}

impl From<&NormalizedCall> for Call {
    fn from(call: &NormalizedCall) -> Self {
        Call {
            contract_address: call.contract_address.to_fixed_hex(),
            entrypoint: call.entrypoint.clone(),
            calldata: call.calldata.iter().map(Felt::to_hex).collect(),
        }
    }
}

pub fn normalize_calls(calls: &[Call]) -> Result<Vec<NormalizedCall>, CallError> {
    calls.iter().map(Call::normalize).collect()
}

/// Addresses must be hex; decimal strings are rejected to avoid ambiguity.
pub fn parse_address(address: &str) -> Result<Felt, FeltError> {
    Felt::from_hex(address.trim())
}

/// Canonical string form of an address, falling back to lowercase when the
/// value is not hex
pub fn canonical_address(address: &str) -> String {
    parse_address(address)
        .map(|felt| felt.to_fixed_hex())
        .unwrap_or_else(|_| address.trim().to_lowercase())
}

/// Starknet-keccak of an entrypoint name (keccak256 truncated to 250 bits)
pub fn get_selector_from_name(name: &str) -> Felt {
    if name == "__default__" || name == "__l1_default__" {
        return Felt::ZERO;
    }
    starknet_keccak(name.as_bytes())
}

/// keccak256 truncated to 250 bits
pub fn starknet_keccak(data: &[u8]) -> Felt {
    let digest: [u8; 32] = Keccak256::digest(data).into();
    Felt::from_bytes_be(digest).mask_bits(250)
}

/// Calldata for an account `__execute__` over a batch of calls:
/// `[n_calls, (to, selector, calldata_len, calldata...)...]`
pub fn build_execute_calldata(calls: &[NormalizedCall]) -> Vec<Felt> {
    let mut calldata = Vec::with_capacity(1 + calls.len() * 4);
    calldata.push(Felt::from_u64(calls.len() as u64));
    for call in calls {
        calldata.push(call.contract_address);
        calldata.push(call.selector());
        calldata.push(Felt::from_u64(call.calldata.len() as u64));
        calldata.extend_from_slice(&call.calldata);
    }
    calldata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pads_address_and_coerces_calldata() {
        let call = Call::new("0xabc", "transfer", ["0x1", "100", "0"]);
        let normalized = call.normalize().unwrap();

        assert_eq!(
            normalized.contract_address.to_fixed_hex(),
            "0x0000000000000000000000000000000000000000000000000000000000000abc"
        );
        assert_eq!(
            normalized.calldata,
            vec![Felt::ONE, Felt::from_u64(100), Felt::ZERO]
        );
    }

    #[test]
    fn test_normalize_rejects_bad_calldata() {
        let call = Call::new("0xabc", "transfer", ["0x1", "one hundred"]);
        let err = call.normalize().unwrap_err();
        assert!(matches!(err, CallError::InvalidCalldata { index: 1, .. }));
    }

    #[test]
    fn test_normalize_rejects_decimal_address() {
        let call = Call::new("2748", "transfer", Vec::<String>::new());
        assert!(matches!(
            call.normalize(),
            Err(CallError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_known_selector() {
        // selector of "transfer" on Starknet
        assert_eq!(
            get_selector_from_name("transfer").to_hex(),
            "0x83afd3f4caedc6eebf44246fe54e38c95e3179a5ec9ea81740eca5b482d12e"
        );
        assert_eq!(get_selector_from_name("__default__"), Felt::ZERO);
    }

    #[test]
    fn test_execute_calldata_layout() {
        let calls = vec![
            Call::new("0x1", "a", ["0x5"]).normalize().unwrap(),
            Call::new("0x2", "b", Vec::<String>::new()).normalize().unwrap(),
        ];
        let calldata = build_execute_calldata(&calls);

        assert_eq!(calldata[0], Felt::from_u64(2));
        assert_eq!(calldata[1], Felt::ONE);
        assert_eq!(calldata[3], Felt::ONE);
        assert_eq!(calldata[4], Felt::from_u64(5));
        assert_eq!(calldata[5], Felt::from_u64(2));
        assert_eq!(calldata[7], Felt::ZERO);
        assert_eq!(calldata.len(), 8);
    }

    #[test]
    fn test_canonical_address_fallback() {
        assert_eq!(canonical_address("NotHex"), "nothex");
        assert_eq!(canonical_address("0xABC"), canonical_address("0xabc"));
    }
}
