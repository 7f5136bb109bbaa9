use serde::{Deserialize, Serialize};

use crate::{build_execute_calldata, Felt, NormalizedCall};

/// Invoke transaction version submitted by the controller
pub const INVOKE_VERSION: u64 = 1;

/// Parameters fixed before a transaction is hashed and signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationDetails {
    pub nonce: u64,
    pub max_fee: Felt,
    pub chain_id: String,
    #[serde(default)]
    pub is_query: bool,
}

impl InvocationDetails {
    pub fn new(nonce: u64, max_fee: Felt, chain_id: impl Into<String>) -> Self {
        Self {
            nonce,
            max_fee,
            chain_id: chain_id.into(),
            is_query: false,
        }
    }

    /// Details for fee estimation, which must never be broadcastable
    pub fn query(nonce: u64, chain_id: impl Into<String>) -> Self {
        Self {
            nonce,
            max_fee: Felt::ZERO,
            chain_id: chain_id.into(),
            is_query: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeTransaction {
    pub sender_address: Felt,
    pub calldata: Vec<Felt>,
    pub max_fee: Felt,
    pub nonce: u64,
    pub version: u64,
    pub chain_id: String,
    #[serde(default)]
    pub is_query: bool,
    #[serde(default)]
    pub signature: Vec<Felt>,
}

impl InvokeTransaction {
    /// Unsigned invoke of `__execute__` on `sender_address`
    pub fn new(sender_address: Felt, calls: &[NormalizedCall], details: &InvocationDetails) -> Self {
        Self {
            sender_address,
            calldata: build_execute_calldata(calls),
            max_fee: details.max_fee,
            nonce: details.nonce,
            version: INVOKE_VERSION,
            chain_id: details.chain_id.clone(),
            is_query: details.is_query,
            signature: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: Vec<Felt>) -> Self {
        self.signature = signature;
        self
    }
}

/// Fee estimate returned by the chain, in the fee token's smallest unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub gas_consumed: u64,
    pub gas_price: u128,
    pub overall_fee: u128,
}

impl FeeEstimate {
    /// Apply a safety margin, e.g. 1.5 for +50%
    pub fn max_fee_with_margin(&self, multiplier: f64) -> Felt {
        let fee = (self.overall_fee as f64 * multiplier).ceil() as u128;
        Felt::from_u128(fee.max(self.overall_fee))
    }
}

/// Meta-transaction sponsored by a paymaster (execute-from-outside)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutsideExecution {
    pub caller: Felt,
    pub nonce: Felt,
    /// Unix seconds
    pub execute_after: u64,
    /// Unix seconds
    pub execute_before: u64,
    pub calls: Vec<NormalizedCall>,
}

impl OutsideExecution {
    /// `'ANY_CALLER'` short string: any relayer may submit
    pub fn any_caller() -> Felt {
        Felt::from_bytes_be([
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, b'A', b'N', b'Y',
            b'_', b'C', b'A', b'L', b'L', b'E', b'R',
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Call;

    #[test]
    fn test_invoke_from_calls() {
        let calls = vec![Call::new("0xabc", "transfer", ["0x1"]).normalize().unwrap()];
        let details = InvocationDetails::new(7, Felt::from_u64(1000), "SN_SEPOLIA");
        let tx = InvokeTransaction::new(Felt::from_u64(0x99), &calls, &details);

        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.calldata[0], Felt::ONE);
        assert!(tx.signature.is_empty());
        assert!(!tx.is_query);
    }

    #[test]
    fn test_fee_margin() {
        let estimate = FeeEstimate {
            gas_consumed: 10,
            gas_price: 10,
            overall_fee: 100,
        };
        assert_eq!(estimate.max_fee_with_margin(1.5), Felt::from_u64(150));
        assert_eq!(estimate.max_fee_with_margin(0.5), Felt::from_u64(100));
    }

    #[test]
    fn test_any_caller_matches_short_string() {
        assert_eq!(
            OutsideExecution::any_caller(),
            Felt::from_short_string("ANY_CALLER").unwrap()
        );
    }
}
