use async_trait::async_trait;
use keychain_types::{FeeEstimate, Felt, InvokeTransaction, NormalizedCall};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backoff::PollSchedule;
use crate::error::ProviderError;

// ═══════════════════════════════════════════════════════════════════════════
// RECEIPTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    /// Known to the node, not yet in a block
    Received,
    AcceptedOnL2,
    AcceptedOnL1,
    /// Dropped before inclusion
    Rejected { reason: String },
    /// Included but execution failed
    Reverted { reason: String },
}

impl TxStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, TxStatus::Received)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, TxStatus::AcceptedOnL2 | TxStatus::AcceptedOnL1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: Felt,
    #[serde(flatten)]
    pub status: TxStatus,
}

// ═══════════════════════════════════════════════════════════════════════════
// PROVIDER TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Read and write access to one chain
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Chain id as a short string, e.g. `SN_SEPOLIA`
    async fn chain_id(&self) -> Result<String, ProviderError>;

    /// `None` when no contract is deployed at `address`
    async fn get_class_hash_at(&self, address: Felt) -> Result<Option<Felt>, ProviderError>;

    /// Read-only contract call against the pending block
    async fn call(&self, call: &NormalizedCall) -> Result<Vec<Felt>, ProviderError>;

    async fn get_nonce(&self, address: Felt) -> Result<u64, ProviderError>;

    /// `None` while the node does not know the transaction yet
    async fn get_transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<Option<TransactionReceipt>, ProviderError>;

    /// Simulate `transactions` in sequence, one estimate per transaction
    async fn estimate_fee(
        &self,
        transactions: &[InvokeTransaction],
    ) -> Result<Vec<FeeEstimate>, ProviderError>;

    /// Broadcast a signed invoke; returns its hash
    async fn add_invoke_transaction(
        &self,
        transaction: &InvokeTransaction,
    ) -> Result<Felt, ProviderError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// FINALITY POLLING
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Give up after this long without a final status
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Poll until the transaction reaches a final status. Transient RPC errors
/// are retried until the timeout.
pub async fn wait_for_transaction(
    provider: &dyn ChainProvider,
    transaction_hash: Felt,
    options: &WaitOptions,
) -> Result<TransactionReceipt, ProviderError> {
    let mut schedule = PollSchedule::new(options.initial_delay, options.max_delay);
    let deadline = tokio::time::Instant::now() + options.timeout;

    loop {
        match provider.get_transaction_receipt(transaction_hash).await {
            Ok(Some(receipt)) if receipt.status.is_final() => {
                debug!(
                    tx_hash = %transaction_hash,
                    status = ?receipt.status,
                    polls = schedule.polls(),
                    "transaction final"
                );
                return Ok(receipt);
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                warn!(tx_hash = %transaction_hash, error = %e, "receipt poll failed, retrying");
            }
            Err(e) => return Err(e),
        }

        let delay = schedule.next_delay();
        if tokio::time::Instant::now() + delay > deadline {
            return Err(ProviderError::Timeout(format!(
                "transaction {transaction_hash} not final after {:?}",
                options.timeout
            )));
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockChainProvider;

    fn fast() -> WaitOptions {
        WaitOptions {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_status_classes() {
        assert!(!TxStatus::Received.is_final());
        assert!(TxStatus::AcceptedOnL2.is_accepted());
        let reverted = TxStatus::Reverted {
            reason: "x".into(),
        };
        assert!(reverted.is_final());
        assert!(!reverted.is_accepted());
    }

    #[tokio::test]
    async fn test_wait_returns_once_final() {
        let provider = MockChainProvider::new("SN_SEPOLIA");
        let hash = Felt::from_u64(0x77);
        provider.set_receipt(hash, TxStatus::Received).await;

        let handle = {
            let provider = provider.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                provider.set_receipt(hash, TxStatus::AcceptedOnL2).await;
            })
        };

        let receipt = wait_for_transaction(&provider, hash, &fast()).await.unwrap();
        assert_eq!(receipt.status, TxStatus::AcceptedOnL2);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let provider = MockChainProvider::new("SN_SEPOLIA");
        let result = wait_for_transaction(&provider, Felt::from_u64(1), &fast()).await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
