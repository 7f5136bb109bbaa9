use keychain_account::{AccountState, NonceCache};
use keychain_provider::{
    wait_for_transaction, ChainProvider, Paymaster, PaymasterError, WaitOptions,
};
use keychain_session::SessionPolicyStore;
use keychain_signer::{ChainHasher, CredentialSigner};
use keychain_types::{
    normalize_calls, AccountStatus, Call, FeeEstimate, Felt, InvocationDetails,
    InvokeTransaction, NormalizedCall, OutsideExecution, PendingRegistration, Policy,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;

/// Default safety margin on estimated fees
pub const DEFAULT_FEE_MULTIPLIER: f64 = 1.5;

/// Validity window of a sponsored outside execution
pub const OUTSIDE_EXECUTION_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Account entrypoint adding a plugin key
pub const REGISTRATION_ENTRYPOINT: &str = "add_public_key";

/// Execution stage tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Normalizing,
    Authorizing,
    Bundling,
    Sponsoring,
    EstimatingFee,
    Submitting,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub fee_multiplier: f64,
    pub outside_execution_window: Duration,
    /// Try the paymaster before paying fees from the account
    pub use_paymaster: bool,
    pub registration_entrypoint: String,
    pub wait: WaitOptions,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            fee_multiplier: DEFAULT_FEE_MULTIPLIER,
            outside_execution_window: OUTSIDE_EXECUTION_WINDOW,
            use_paymaster: true,
            registration_entrypoint: REGISTRATION_ENTRYPOINT.to_string(),
            wait: WaitOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Use this fee instead of estimating
    pub max_fee: Option<Felt>,
    /// Set after the user explicitly confirmed this exact batch
    pub skip_authorization: bool,
}

/// Everything needed to replay an execution after user confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingExecution {
    pub origin: String,
    pub calls: Vec<Call>,
    pub missing_policies: Vec<Policy>,
    pub created_at: u64,
}

/// How a batch reached the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Paymaster,
    SelfPaid,
    /// Sent right behind a cached plugin-key registration
    Bundled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Submitted {
        transaction_hash: Felt,
        path: ExecutionPath,
    },
    /// Not covered by the session; the batch is kept for [`resume`]
    ///
    /// [`resume`]: ExecutionCoordinator::take_pending_execution
    UserInteractionRequired { pending: PendingExecution },
}

/// Serializes executions for one account on one chain.
///
/// Holds the execution lock for the whole pipeline (authorization, fee
/// estimation, signing, submission, nonce bookkeeping), so concurrent
/// callers never interleave their chain requests or reuse a nonce.
pub struct ExecutionCoordinator {
    account: Arc<AccountState>,
    nonces: NonceCache,
    sessions: SessionPolicyStore,
    signer: Arc<dyn CredentialSigner>,
    hasher: Arc<dyn ChainHasher>,
    provider: Arc<dyn ChainProvider>,
    paymaster: Option<Arc<dyn Paymaster>>,
    settings: ExecutorSettings,
    lock: Arc<Mutex<()>>,
    pending: Mutex<Option<PendingExecution>>,
    watchers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionCoordinator {
    pub fn new(
        account: Arc<AccountState>,
        nonces: NonceCache,
        sessions: SessionPolicyStore,
        signer: Arc<dyn CredentialSigner>,
        hasher: Arc<dyn ChainHasher>,
        provider: Arc<dyn ChainProvider>,
    ) -> Self {
        Self {
            account,
            nonces,
            sessions,
            signer,
            hasher,
            provider,
            paymaster: None,
            settings: ExecutorSettings::default(),
            lock: Arc::new(Mutex::new(())),
            pending: Mutex::new(None),
            watchers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_paymaster(mut self, paymaster: Arc<dyn Paymaster>) -> Self {
        self.paymaster = Some(paymaster);
        self
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share the execution lock with other coordinators for the same
    /// account, so a replacement coordinator waits on in-flight executions
    pub fn with_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.lock = lock;
        self
    }

    pub fn account(&self) -> &Arc<AccountState> {
        &self.account
    }

    pub fn sessions(&self) -> &SessionPolicyStore {
        &self.sessions
    }

    pub fn nonces(&self) -> &NonceCache {
        &self.nonces
    }

    fn address(&self) -> Felt {
        self.account.address()
    }

    fn chain_id(&self) -> &str {
        self.account.chain_id()
    }

    /// Execute a call batch on behalf of `origin`
    pub async fn execute(
        &self,
        origin: &str,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let _guard = self.lock.lock().await;
        info!(address = %self.address(), origin = %origin, calls = calls.len(), "starting execution");

        debug!(stage = ?ExecutionStage::Normalizing, "normalizing calls");
        let normalized = normalize_calls(calls)?;
        if normalized.is_empty() {
            return Err(ExecutionError::EmptyBatch);
        }

        self.account.ensure_deployed().await?;

        if !options.skip_authorization {
            debug!(stage = ?ExecutionStage::Authorizing, "checking session policies");
            let missing = self.sessions.authorize_calls(origin, &normalized).await?;
            if !missing.is_empty() {
                let pending = PendingExecution {
                    origin: origin.to_string(),
                    calls: calls.to_vec(),
                    missing_policies: missing,
                    created_at: chrono::Utc::now().timestamp().max(0) as u64,
                };
                info!(
                    origin = %origin,
                    missing = pending.missing_policies.len(),
                    "execution needs user interaction"
                );
                *self.pending.lock().await = Some(pending.clone());
                return Ok(ExecutionOutcome::UserInteractionRequired { pending });
            }
        }

        if self.account.status().await? == AccountStatus::PendingRegister {
            if let Some(registration) = self.account.pending_registration().await? {
                if let Some(outcome) = self
                    .execute_bundled(&registration, &normalized, options)
                    .await?
                {
                    self.pending.lock().await.take();
                    return Ok(outcome);
                }
            }
        }

        if let Some(paymaster) = self.paymaster.clone().filter(|_| self.settings.use_paymaster) {
            debug!(stage = ?ExecutionStage::Sponsoring, "trying paymaster");
            match self.execute_sponsored(paymaster.as_ref(), &normalized).await {
                Ok(transaction_hash) => {
                    info!(tx_hash = %transaction_hash, "execution sponsored");
                    self.pending.lock().await.take();
                    return Ok(ExecutionOutcome::Submitted {
                        transaction_hash,
                        path: ExecutionPath::Paymaster,
                    });
                }
                Err(ExecutionError::Paymaster(PaymasterError::Unsupported(reason))) => {
                    info!(reason = %reason, "paymaster unsupported, paying fee from account");
                }
                Err(e) => {
                    warn!(error = %e, "paymaster execution failed");
                    return Err(e);
                }
            }
        }

        let transaction_hash = self.execute_self_paid(&normalized, options).await?;
        self.pending.lock().await.take();
        Ok(ExecutionOutcome::Submitted {
            transaction_hash,
            path: ExecutionPath::SelfPaid,
        })
    }

    async fn execute_sponsored(
        &self,
        paymaster: &dyn Paymaster,
        calls: &[NormalizedCall],
    ) -> Result<Felt, ExecutionError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let outside_execution = OutsideExecution {
            caller: OutsideExecution::any_caller(),
            // random so it never collides with the account's own nonce
            nonce: Felt::from_u128(uuid::Uuid::new_v4().as_u128()),
            execute_after: now.saturating_sub(60),
            execute_before: now + self.settings.outside_execution_window.as_secs(),
            calls: calls.to_vec(),
        };

        let signature = self
            .signer
            .sign_outside_execution(
                self.hasher.as_ref(),
                &outside_execution,
                self.address(),
                self.chain_id(),
            )
            .await?;

        paymaster
            .execute_outside(self.address(), self.chain_id(), &outside_execution, &signature)
            .await
            .map_err(ExecutionError::Paymaster)
    }

    async fn execute_self_paid(
        &self,
        calls: &[NormalizedCall],
        options: &ExecuteOptions,
    ) -> Result<Felt, ExecutionError> {
        let nonce = self.nonces.current().await?;

        let max_fee = match options.max_fee {
            Some(fee) => fee,
            None => {
                debug!(stage = ?ExecutionStage::EstimatingFee, nonce, "estimating fee");
                let estimate = self.estimate(calls, nonce).await?;
                estimate.max_fee_with_margin(self.settings.fee_multiplier)
            }
        };

        debug!(stage = ?ExecutionStage::Submitting, nonce, max_fee = %max_fee, "submitting");
        let transaction = self
            .signer
            .sign_transaction(
                self.hasher.as_ref(),
                self.address(),
                calls,
                &InvocationDetails::new(nonce, max_fee, self.chain_id()),
            )
            .await?;
        let transaction_hash = self.provider.add_invoke_transaction(&transaction).await?;
        self.nonces.advance_to(nonce + 1).await?;

        info!(tx_hash = %transaction_hash, nonce, "transaction submitted");
        self.spawn_watcher(transaction_hash);
        Ok(transaction_hash)
    }

    /// Submit the cached registration followed by `calls` at the next nonce.
    /// Returns `None` when the registration is stale and was dropped.
    async fn execute_bundled(
        &self,
        registration: &PendingRegistration,
        calls: &[NormalizedCall],
        options: &ExecuteOptions,
    ) -> Result<Option<ExecutionOutcome>, ExecutionError> {
        let registration_nonce = registration.nonce();
        let chain_nonce = self.nonces.current().await?;
        if registration_nonce < chain_nonce {
            warn!(
                registration_nonce,
                chain_nonce, "cached registration is stale, dropping it"
            );
            self.account.abandon_registration().await?;
            return Ok(None);
        }

        debug!(stage = ?ExecutionStage::Bundling, registration_nonce, "bundling with registration");
        let call_nonce = registration_nonce + 1;
        let max_fee = match options.max_fee {
            Some(fee) => fee,
            None => {
                let query = InvokeTransaction::new(
                    self.address(),
                    calls,
                    &InvocationDetails::query(call_nonce, self.chain_id()),
                );
                let estimates = self
                    .provider
                    .estimate_fee(&[registration.transaction.clone(), query])
                    .await?;
                let estimate = estimates.get(1).ok_or(ExecutionError::FeeEstimate {
                    expected: 2,
                    got: estimates.len(),
                })?;
                estimate.max_fee_with_margin(self.settings.fee_multiplier)
            }
        };

        let transaction = self
            .signer
            .sign_transaction(
                self.hasher.as_ref(),
                self.address(),
                calls,
                &InvocationDetails::new(call_nonce, max_fee, self.chain_id()),
            )
            .await?;

        let registration_hash = match self
            .provider
            .add_invoke_transaction(&registration.transaction)
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                warn!(error = %e, "registration submission failed");
                self.nonces.reset().await?;
                self.account.abandon_registration().await?;
                return Err(e.into());
            }
        };
        self.account.mark_registering(registration_hash).await?;

        let transaction_hash = match self.provider.add_invoke_transaction(&transaction).await {
            Ok(hash) => hash,
            Err(e) => {
                // the registration is out, so its nonce is spent
                self.nonces.advance_to(call_nonce).await?;
                return Err(e.into());
            }
        };
        self.nonces.advance_to(call_nonce + 1).await?;

        info!(
            registration_hash = %registration_hash,
            tx_hash = %transaction_hash,
            call_nonce,
            "registration bundled with execution"
        );
        self.spawn_bundle_watcher(registration_hash, transaction_hash);

        Ok(Some(ExecutionOutcome::Submitted {
            transaction_hash,
            path: ExecutionPath::Bundled,
        }))
    }

    async fn estimate(
        &self,
        calls: &[NormalizedCall],
        nonce: u64,
    ) -> Result<FeeEstimate, ExecutionError> {
        let query = InvokeTransaction::new(
            self.address(),
            calls,
            &InvocationDetails::query(nonce, self.chain_id()),
        );
        let estimates = self.provider.estimate_fee(&[query]).await?;
        estimates
            .first()
            .copied()
            .ok_or(ExecutionError::FeeEstimate {
                expected: 1,
                got: 0,
            })
    }

    /// Fee the account would pay to execute `calls` now
    pub async fn estimate_invoke_fee(&self, calls: &[Call]) -> Result<FeeEstimate, ExecutionError> {
        let _guard = self.lock.lock().await;
        let normalized = normalize_calls(calls)?;
        if normalized.is_empty() {
            return Err(ExecutionError::EmptyBatch);
        }
        self.account.ensure_deployed().await?;
        let nonce = self.nonces.current().await?;
        self.estimate(&normalized, nonce).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // REGISTRATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Sign an invocation adding the signer's key to the account and cache
    /// it for the next execution. Only a deployed, unregistered account with
    /// nothing cached yet gets one; otherwise returns `None`.
    pub async fn prepare_registration(
        &self,
    ) -> Result<Option<PendingRegistration>, ExecutionError> {
        let _guard = self.lock.lock().await;
        if self.account.status().await? != AccountStatus::Deployed
            || self.account.pending_registration().await?.is_some()
        {
            return Ok(None);
        }

        let public_key = self.signer.public_key();
        let call = NormalizedCall {
            contract_address: self.address(),
            entrypoint: self.settings.registration_entrypoint.clone(),
            calldata: vec![public_key],
        };
        let nonce = self.nonces.current().await?;
        let max_fee = self
            .estimate(std::slice::from_ref(&call), nonce)
            .await?
            .max_fee_with_margin(self.settings.fee_multiplier);

        let transaction = self
            .signer
            .sign_transaction(
                self.hasher.as_ref(),
                self.address(),
                std::slice::from_ref(&call),
                &InvocationDetails::new(nonce, max_fee, self.chain_id()),
            )
            .await?;
        let registration = PendingRegistration {
            transaction,
            public_key,
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
        };
        self.account.cache_registration(&registration).await?;

        info!(
            address = %self.address(),
            public_key = %public_key,
            nonce,
            "plugin key registration cached"
        );
        Ok(Some(registration))
    }

    pub async fn pending_execution(&self) -> Option<PendingExecution> {
        self.pending.lock().await.clone()
    }

    pub async fn take_pending_execution(&self) -> Option<PendingExecution> {
        self.pending.lock().await.take()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // FINALITY WATCHERS
    // ═══════════════════════════════════════════════════════════════════════

    fn track(&self, handle: JoinHandle<()>) {
        let mut watchers = self
            .watchers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        watchers.retain(|w| !w.is_finished());
        watchers.push(handle);
    }

    /// Reset the nonce cache if the transaction does not land
    fn spawn_watcher(&self, transaction_hash: Felt) {
        let provider = self.provider.clone();
        let nonces = self.nonces.clone();
        let wait = self.settings.wait.clone();

        self.track(tokio::spawn(async move {
            let landed = match wait_for_transaction(provider.as_ref(), transaction_hash, &wait).await
            {
                Ok(receipt) if receipt.status.is_accepted() => true,
                Ok(receipt) => {
                    warn!(tx_hash = %transaction_hash, status = ?receipt.status, "transaction did not land");
                    false
                }
                Err(e) => {
                    warn!(tx_hash = %transaction_hash, error = %e, "transaction not final");
                    false
                }
            };
            if !landed {
                if let Err(e) = nonces.reset().await {
                    warn!(error = %e, "nonce reset failed");
                }
            }
        }));
    }

    /// `REGISTERED` only once both transactions are accepted
    fn spawn_bundle_watcher(&self, registration_hash: Felt, transaction_hash: Felt) {
        let provider = self.provider.clone();
        let nonces = self.nonces.clone();
        let account = self.account.clone();
        let wait = self.settings.wait.clone();

        self.track(tokio::spawn(async move {
            let accepted = |hash: Felt| {
                let provider = provider.clone();
                let wait = wait.clone();
                async move {
                    wait_for_transaction(provider.as_ref(), hash, &wait)
                        .await
                        .map(|receipt| receipt.status.is_accepted())
                        .unwrap_or(false)
                }
            };

            let registration_ok = accepted(registration_hash).await;
            let call_ok = accepted(transaction_hash).await;

            let result = match (registration_ok, call_ok) {
                (true, true) => account.mark_registered().await,
                (false, _) => {
                    warn!(registration_hash = %registration_hash, "registration did not land");
                    match nonces.reset().await {
                        Ok(()) => account.abandon_registration().await,
                        Err(e) => Err(e),
                    }
                }
                (true, false) => {
                    // registration landed; the next sync confirms it on chain
                    warn!(tx_hash = %transaction_hash, "bundled call did not land");
                    nonces.reset().await
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "bundle bookkeeping failed");
            }
        }));
    }

    /// Wait for every background watcher to finish
    pub async fn drain_watchers(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut watchers = self
                .watchers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            watchers.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "watcher task failed");
            }
        }
    }
}

impl Drop for ExecutionCoordinator {
    fn drop(&mut self) {
        if let Ok(watchers) = self.watchers.get_mut() {
            for handle in watchers.drain(..) {
                handle.abort();
            }
        }
    }
}
