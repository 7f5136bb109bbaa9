use async_trait::async_trait;
use keychain_types::{
    AccountRecord, FeeEstimate, Felt, InvokeTransaction, NormalizedCall, OutsideExecution,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::backend::{BackendApi, DeployStatus, DeployTransaction};
use crate::chain::{ChainProvider, TransactionReceipt, TxStatus};
use crate::error::{rpc_codes, BackendError, PaymasterError, ProviderError};
use crate::paymaster::Paymaster;

// ═══════════════════════════════════════════════════════════════════════════
// MOCK CHAIN PROVIDER
// ═══════════════════════════════════════════════════════════════════════════

/// One RPC observed by [`MockChainProvider`], in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcEvent {
    ChainId,
    GetClassHashAt(Felt),
    Call { entrypoint: String },
    GetNonce(Felt),
    GetReceipt(Felt),
    EstimateFee { nonces: Vec<u64> },
    AddInvoke { nonce: u64, hash: Felt },
}

struct MockChainState {
    chain_id: String,
    nonces: HashMap<Felt, u64>,
    class_hashes: HashMap<Felt, Felt>,
    call_results: HashMap<(Felt, String), Vec<Felt>>,
    receipts: HashMap<Felt, TxStatus>,
    submitted: Vec<(Felt, InvokeTransaction)>,
    events: Vec<RpcEvent>,
    overall_fee: u128,
    nonce_lag: bool,
    auto_finalize: bool,
    reject_nonces: HashSet<u64>,
    estimate_error: Option<ProviderError>,
    invoke_error: Option<ProviderError>,
    next_hash: u64,
}

/// In-process chain with scriptable state and an RPC event log
#[derive(Clone)]
pub struct MockChainProvider {
    state: Arc<Mutex<MockChainState>>,
    latency: Duration,
}

impl MockChainProvider {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChainState {
                chain_id: chain_id.into(),
                nonces: HashMap::new(),
                class_hashes: HashMap::new(),
                call_results: HashMap::new(),
                receipts: HashMap::new(),
                submitted: Vec::new(),
                events: Vec::new(),
                overall_fee: 1_000,
                nonce_lag: false,
                auto_finalize: true,
                reject_nonces: HashSet::new(),
                estimate_error: None,
                invoke_error: None,
                next_hash: 0x1000,
            })),
            latency: Duration::ZERO,
        }
    }

    /// Sleep this long inside every RPC, after logging it
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn set_nonce(&self, address: Felt, nonce: u64) {
        self.state.lock().await.nonces.insert(address, nonce);
    }

    pub async fn set_class_hash(&self, address: Felt, class_hash: Felt) {
        self.state.lock().await.class_hashes.insert(address, class_hash);
    }

    pub async fn set_call_result(&self, contract: Felt, entrypoint: &str, result: Vec<Felt>) {
        self.state
            .lock()
            .await
            .call_results
            .insert((contract, entrypoint.to_string()), result);
    }

    pub async fn set_receipt(&self, hash: Felt, status: TxStatus) {
        self.state.lock().await.receipts.insert(hash, status);
    }

    pub async fn set_overall_fee(&self, fee: u128) {
        self.state.lock().await.overall_fee = fee;
    }

    /// Chain nonce stays put after invokes, as if confirmations lag
    pub async fn set_nonce_lag(&self, lag: bool) {
        self.state.lock().await.nonce_lag = lag;
    }

    /// When false, new transactions stay `Received` until finalized by hand
    pub async fn set_auto_finalize(&self, auto_finalize: bool) {
        self.state.lock().await.auto_finalize = auto_finalize;
    }

    /// Invokes with this nonce end up `Rejected`
    pub async fn reject_nonce(&self, nonce: u64) {
        self.state.lock().await.reject_nonces.insert(nonce);
    }

    pub async fn fail_estimates(&self, error: Option<ProviderError>) {
        self.state.lock().await.estimate_error = error;
    }

    pub async fn fail_invokes(&self, error: Option<ProviderError>) {
        self.state.lock().await.invoke_error = error;
    }

    /// Move every `Received` transaction to `AcceptedOnL2`
    pub async fn finalize_pending(&self) {
        let mut state = self.state.lock().await;
        let mut accepted = Vec::new();
        for (hash, status) in state.receipts.iter_mut() {
            if *status == TxStatus::Received {
                *status = TxStatus::AcceptedOnL2;
                accepted.push(*hash);
            }
        }
        if !state.nonce_lag {
            return;
        }
        let bumps: Vec<(Felt, u64)> = state
            .submitted
            .iter()
            .filter(|(hash, _)| accepted.contains(hash))
            .map(|(_, tx)| (tx.sender_address, tx.nonce + 1))
            .collect();
        for (address, next) in bumps {
            let entry = state.nonces.entry(address).or_insert(0);
            *entry = (*entry).max(next);
        }
    }

    pub async fn events(&self) -> Vec<RpcEvent> {
        self.state.lock().await.events.clone()
    }

    pub async fn clear_events(&self) {
        self.state.lock().await.events.clear();
    }

    /// Broadcast transactions with their hashes, in submission order
    pub async fn submitted(&self) -> Vec<(Felt, InvokeTransaction)> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn chain_nonce(&self, address: Felt) -> u64 {
        self.state
            .lock()
            .await
            .nonces
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    async fn record(&self, event: RpcEvent) {
        self.state.lock().await.events.push(event);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ChainProvider for MockChainProvider {
    async fn chain_id(&self) -> Result<String, ProviderError> {
        self.record(RpcEvent::ChainId).await;
        Ok(self.state.lock().await.chain_id.clone())
    }

    async fn get_class_hash_at(&self, address: Felt) -> Result<Option<Felt>, ProviderError> {
        self.record(RpcEvent::GetClassHashAt(address)).await;
        Ok(self.state.lock().await.class_hashes.get(&address).copied())
    }

    async fn call(&self, call: &NormalizedCall) -> Result<Vec<Felt>, ProviderError> {
        self.record(RpcEvent::Call {
            entrypoint: call.entrypoint.clone(),
        })
        .await;
        let state = self.state.lock().await;
        if !state.class_hashes.contains_key(&call.contract_address) {
            return Err(ProviderError::Rpc {
                code: rpc_codes::CONTRACT_NOT_FOUND,
                message: "Contract not found".to_string(),
                data: None,
            });
        }
        Ok(state
            .call_results
            .get(&(call.contract_address, call.entrypoint.clone()))
            .cloned()
            .unwrap_or_else(|| vec![Felt::ZERO]))
    }

    async fn get_nonce(&self, address: Felt) -> Result<u64, ProviderError> {
        self.record(RpcEvent::GetNonce(address)).await;
        Ok(self.chain_nonce(address).await)
    }

    async fn get_transaction_receipt(
        &self,
        transaction_hash: Felt,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        self.record(RpcEvent::GetReceipt(transaction_hash)).await;
        Ok(self
            .state
            .lock()
            .await
            .receipts
            .get(&transaction_hash)
            .cloned()
            .map(|status| TransactionReceipt {
                transaction_hash,
                status,
            }))
    }

    async fn estimate_fee(
        &self,
        transactions: &[InvokeTransaction],
    ) -> Result<Vec<FeeEstimate>, ProviderError> {
        self.record(RpcEvent::EstimateFee {
            nonces: transactions.iter().map(|tx| tx.nonce).collect(),
        })
        .await;
        let state = self.state.lock().await;
        if let Some(error) = &state.estimate_error {
            return Err(error.clone());
        }
        let fee = state.overall_fee;
        Ok(transactions
            .iter()
            .map(|_| FeeEstimate {
                gas_consumed: fee as u64,
                gas_price: 1,
                overall_fee: fee,
            })
            .collect())
    }

    async fn add_invoke_transaction(
        &self,
        transaction: &InvokeTransaction,
    ) -> Result<Felt, ProviderError> {
        let hash = {
            let mut state = self.state.lock().await;
            if let Some(error) = &state.invoke_error {
                return Err(error.clone());
            }

            let chain_nonce = state
                .nonces
                .get(&transaction.sender_address)
                .copied()
                .unwrap_or(0);
            if transaction.nonce < chain_nonce {
                return Err(ProviderError::Rpc {
                    code: rpc_codes::INVALID_TRANSACTION_NONCE,
                    message: "Invalid transaction nonce".to_string(),
                    data: Some(serde_json::Value::String(format!(
                        "expected nonce >= {chain_nonce}, got {}",
                        transaction.nonce
                    ))),
                });
            }

            let hash = Felt::from_u64(state.next_hash);
            state.next_hash += 1;

            let status = if state.reject_nonces.contains(&transaction.nonce) {
                TxStatus::Rejected {
                    reason: "validation failed".to_string(),
                }
            } else if state.auto_finalize {
                TxStatus::AcceptedOnL2
            } else {
                TxStatus::Received
            };
            state.receipts.insert(hash, status);
            state.submitted.push((hash, transaction.clone()));

            if !state.nonce_lag {
                let entry = state.nonces.entry(transaction.sender_address).or_insert(0);
                *entry = (*entry).max(transaction.nonce + 1);
            }
            hash
        };

        self.record(RpcEvent::AddInvoke {
            nonce: transaction.nonce,
            hash,
        })
        .await;
        Ok(hash)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK PAYMASTER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum PaymasterMode {
    Sponsor,
    Unsupported,
    Reject {
        message: String,
        data: Option<String>,
    },
    Network(String),
}

#[derive(Debug, Clone)]
pub struct PaymasterRequest {
    pub address: Felt,
    pub chain_id: String,
    pub outside_execution: OutsideExecution,
    pub signature: Vec<Felt>,
}

#[derive(Clone)]
pub struct MockPaymaster {
    mode: Arc<Mutex<PaymasterMode>>,
    requests: Arc<Mutex<Vec<PaymasterRequest>>>,
}

impl MockPaymaster {
    pub fn new(mode: PaymasterMode) -> Self {
        Self {
            mode: Arc::new(Mutex::new(mode)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sponsoring() -> Self {
        Self::new(PaymasterMode::Sponsor)
    }

    pub fn unsupported() -> Self {
        Self::new(PaymasterMode::Unsupported)
    }

    pub async fn set_mode(&self, mode: PaymasterMode) {
        *self.mode.lock().await = mode;
    }

    pub async fn requests(&self) -> Vec<PaymasterRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Paymaster for MockPaymaster {
    async fn execute_outside(
        &self,
        address: Felt,
        chain_id: &str,
        outside_execution: &OutsideExecution,
        signature: &[Felt],
    ) -> Result<Felt, PaymasterError> {
        let mode = self.mode.lock().await.clone();
        let mut requests = self.requests.lock().await;
        requests.push(PaymasterRequest {
            address,
            chain_id: chain_id.to_string(),
            outside_execution: outside_execution.clone(),
            signature: signature.to_vec(),
        });

        match mode {
            PaymasterMode::Sponsor => Ok(Felt::from_u64(0xface_0000 + requests.len() as u64)),
            PaymasterMode::Unsupported => Err(PaymasterError::Unsupported(
                "account not eligible for sponsorship".to_string(),
            )),
            PaymasterMode::Reject { message, data } => {
                Err(PaymasterError::Rejected { message, data })
            }
            PaymasterMode::Network(message) => Err(PaymasterError::Network(message)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK BACKEND
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Default)]
pub struct MockBackend {
    accounts: Arc<Mutex<HashMap<String, AccountRecord>>>,
    deploy_transactions: Arc<Mutex<HashMap<(Felt, String), DeployTransaction>>>,
    deploy_requests: Arc<Mutex<Vec<(Felt, String)>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, account: AccountRecord) {
        self.accounts
            .lock()
            .await
            .insert(account.username.clone(), account);
    }

    pub async fn set_deploy_transaction(
        &self,
        address: Felt,
        chain_id: &str,
        transaction: Option<DeployTransaction>,
    ) {
        let mut txs = self.deploy_transactions.lock().await;
        let key = (address, chain_id.to_string());
        match transaction {
            Some(tx) => txs.insert(key, tx),
            None => txs.remove(&key),
        };
    }

    pub async fn deploy_requests(&self) -> Vec<(Felt, String)> {
        self.deploy_requests.lock().await.clone()
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn account(&self, username: &str) -> Result<Option<AccountRecord>, BackendError> {
        Ok(self.accounts.lock().await.get(username).cloned())
    }

    async fn deploy_transaction(
        &self,
        address: Felt,
        chain_id: &str,
    ) -> Result<Option<DeployTransaction>, BackendError> {
        Ok(self
            .deploy_transactions
            .lock()
            .await
            .get(&(address, chain_id.to_string()))
            .cloned())
    }

    async fn deploy_account(&self, address: Felt, chain_id: &str) -> Result<Felt, BackendError> {
        let mut requests = self.deploy_requests.lock().await;
        requests.push((address, chain_id.to_string()));
        let hash = Felt::from_u64(0xdead_0000 + requests.len() as u64);
        self.deploy_transactions.lock().await.insert(
            (address, chain_id.to_string()),
            DeployTransaction {
                transaction_hash: hash,
                status: DeployStatus::Pending,
            },
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keychain_types::InvocationDetails;

    fn invoke(sender: Felt, nonce: u64) -> InvokeTransaction {
        InvokeTransaction::new(sender, &[], &InvocationDetails::new(nonce, Felt::ONE, "SN_TEST"))
    }

    #[tokio::test]
    async fn test_invoke_advances_nonce_and_logs() {
        let chain = MockChainProvider::new("SN_TEST");
        let account = Felt::from_u64(0xa);
        chain.set_nonce(account, 3).await;

        let hash = chain.add_invoke_transaction(&invoke(account, 3)).await.unwrap();
        assert_eq!(chain.chain_nonce(account).await, 4);
        assert_eq!(
            chain.events().await,
            vec![RpcEvent::AddInvoke { nonce: 3, hash }]
        );
    }

    #[tokio::test]
    async fn test_stale_nonce_rejected() {
        let chain = MockChainProvider::new("SN_TEST");
        let account = Felt::from_u64(0xa);
        chain.set_nonce(account, 5).await;

        let err = chain.add_invoke_transaction(&invoke(account, 4)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rpc { code: 52, .. }));
    }

    #[tokio::test]
    async fn test_lagging_chain_catches_up_on_finalize() {
        let chain = MockChainProvider::new("SN_TEST");
        let account = Felt::from_u64(0xa);
        chain.set_nonce_lag(true).await;
        chain.set_auto_finalize(false).await;

        let hash = chain.add_invoke_transaction(&invoke(account, 0)).await.unwrap();
        assert_eq!(chain.chain_nonce(account).await, 0);

        chain.finalize_pending().await;
        assert_eq!(chain.chain_nonce(account).await, 1);
        let receipt = chain.get_transaction_receipt(hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, TxStatus::AcceptedOnL2);
    }

    #[tokio::test]
    async fn test_mock_backend_deploy_is_pending() {
        let backend = MockBackend::new();
        let address = Felt::from_u64(1);
        let hash = backend.deploy_account(address, "SN_TEST").await.unwrap();

        let tx = backend
            .deploy_transaction(address, "SN_TEST")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.transaction_hash, hash);
        assert_eq!(tx.status, DeployStatus::Pending);
    }
}
