use keychain_provider::{wait_for_transaction, BackendApi, ChainProvider, DeployStatus, WaitOptions};
use keychain_store::{keys, Storage};
use keychain_types::{AccountStatus, DeploymentRecord, Felt, NormalizedCall, PendingRegistration};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AccountError;

/// Account entrypoint answering whether a public key is a registered plugin key
pub const PLUGIN_KEY_ENTRYPOINT: &str = "is_public_key_registered";

/// Minimum spacing between two syncs of the same account and chain
pub const SYNC_DEBOUNCE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AccountSettings {
    /// Newest account class; a deployed account on another class is stale
    pub latest_class_hash: Option<Felt>,
    pub sync_debounce: Duration,
    pub introspection_entrypoint: String,
    pub wait: WaitOptions,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            latest_class_hash: None,
            sync_debounce: SYNC_DEBOUNCE,
            introspection_entrypoint: PLUGIN_KEY_ENTRYPOINT.to_string(),
            wait: WaitOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another sync ran within the debounce window
    Debounced,
    Synced(AccountStatus),
    /// Sync is advisory; errors are reported here, never raised
    Failed(String),
}

/// Deployment and registration state of one account on one chain.
///
/// Status is reconciled against the chain and the backend by [`sync`];
/// the execution path moves it through the registration states directly.
///
/// [`sync`]: AccountState::sync
pub struct AccountState {
    address: Felt,
    chain_id: String,
    public_key: Felt,
    storage: Storage,
    provider: Arc<dyn ChainProvider>,
    backend: Arc<dyn BackendApi>,
    settings: AccountSettings,
    /// Serializes read-modify-write of the deployment record
    write_lock: Mutex<()>,
}

impl AccountState {
    pub fn new(
        address: Felt,
        chain_id: impl Into<String>,
        public_key: Felt,
        storage: Storage,
        provider: Arc<dyn ChainProvider>,
        backend: Arc<dyn BackendApi>,
        settings: AccountSettings,
    ) -> Self {
        Self {
            address,
            chain_id: chain_id.into(),
            public_key,
            storage,
            provider,
            backend,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// Construct and run the initial sync
    pub async fn load(
        address: Felt,
        chain_id: impl Into<String>,
        public_key: Felt,
        storage: Storage,
        provider: Arc<dyn ChainProvider>,
        backend: Arc<dyn BackendApi>,
        settings: AccountSettings,
    ) -> Self {
        let state = Self::new(
            address, chain_id, public_key, storage, provider, backend, settings,
        );
        state.sync().await;
        state
    }

    pub fn address(&self) -> Felt {
        self.address
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn public_key(&self) -> Felt {
        self.public_key
    }

    fn deployment_key(&self) -> String {
        keys::deployment(&self.address, &self.chain_id)
    }

    fn registration_key(&self) -> String {
        keys::registration(&self.address, &self.chain_id)
    }

    pub async fn record(&self) -> Result<DeploymentRecord, AccountError> {
        Ok(self
            .storage
            .get_json(&self.deployment_key())
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, record: &DeploymentRecord) -> Result<(), AccountError> {
        self.storage.set_json(&self.deployment_key(), record).await?;
        Ok(())
    }

    /// Apply `change` to the stored record under the write lock
    async fn update(
        &self,
        change: impl FnOnce(&mut DeploymentRecord),
    ) -> Result<(), AccountError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.record().await?;
        change(&mut record);
        self.save(&record).await
    }

    /// Write `record` only if the stored one still equals `base`, the
    /// snapshot it was derived from. Returns false when another writer
    /// got there first; the stored record is then left as is.
    async fn save_unless_changed(
        &self,
        base: &DeploymentRecord,
        record: &DeploymentRecord,
    ) -> Result<bool, AccountError> {
        let _guard = self.write_lock.lock().await;
        let current = self.record().await?;
        if current != *base {
            debug!(
                address = %self.address,
                status = %current.status,
                "record changed during sync, keeping the newer one"
            );
            return Ok(false);
        }
        self.save(record).await?;
        Ok(true)
    }

    async fn commit(
        &self,
        base: &DeploymentRecord,
        record: &DeploymentRecord,
    ) -> Result<AccountStatus, AccountError> {
        if self.save_unless_changed(base, record).await? {
            Ok(record.status)
        } else {
            self.status().await
        }
    }

    fn transition(&self, record: &mut DeploymentRecord, status: AccountStatus) {
        if record.status != status {
            info!(
                address = %self.address,
                chain_id = %self.chain_id,
                from = %record.status,
                to = %status,
                "account status changed"
            );
            record.status = status;
        }
    }

    pub async fn status(&self) -> Result<AccountStatus, AccountError> {
        Ok(self.record().await?.status)
    }

    pub async fn class_hash(&self) -> Result<Option<Felt>, AccountError> {
        Ok(self.record().await?.class_hash)
    }

    /// False when the deployed class is older than the latest known one
    pub async fn is_updated(&self) -> Result<bool, AccountError> {
        Ok(self.record().await?.updated)
    }

    /// Fatal precondition for execution and fee estimation
    pub async fn ensure_deployed(&self) -> Result<(), AccountError> {
        if self.status().await? == AccountStatus::Counterfactual {
            return Err(AccountError::NotDeployed {
                address: self.address,
                chain_id: self.chain_id.clone(),
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SYNC
    // ═══════════════════════════════════════════════════════════════════════

    /// Debounced reconciliation with the chain and the backend
    pub async fn sync(&self) -> SyncOutcome {
        match self.claim_sync_slot().await {
            Ok(true) => {}
            Ok(false) => return SyncOutcome::Debounced,
            Err(e) => {
                warn!(address = %self.address, error = %e, "sync debounce check failed");
                return SyncOutcome::Failed(e.to_string());
            }
        }
        self.force_sync().await
    }

    /// Reconcile now, ignoring the debounce window
    pub async fn force_sync(&self) -> SyncOutcome {
        match self.reconcile().await {
            Ok(status) => SyncOutcome::Synced(status),
            Err(e) => {
                warn!(
                    address = %self.address,
                    chain_id = %self.chain_id,
                    error = %e,
                    "account sync failed"
                );
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    /// Check and stamp the persisted last-sync time. Shared storage makes
    /// this advisory across instances, which sync tolerates.
    async fn claim_sync_slot(&self) -> Result<bool, AccountError> {
        let key = keys::last_sync(&self.address, &self.chain_id);
        let now = chrono::Utc::now().timestamp_millis();
        let last: Option<i64> = self.storage.get_json(&key).await?;

        if let Some(last) = last {
            let window = self.settings.sync_debounce.as_millis() as i64;
            if now.saturating_sub(last) < window {
                debug!(address = %self.address, "sync debounced");
                return Ok(false);
            }
        }
        self.storage.set_json(&key, &now).await?;
        Ok(true)
    }

    async fn reconcile(&self) -> Result<AccountStatus, AccountError> {
        let mut base = self.record().await?;
        let mut record = base.clone();

        match record.status {
            AccountStatus::PendingRegister => return Ok(record.status),
            AccountStatus::Counterfactual
            | AccountStatus::Deploying
            | AccountStatus::Registering => {
                if let Some(tx_hash) = record.registration_tx_hash {
                    let receipt =
                        wait_for_transaction(self.provider.as_ref(), tx_hash, &self.settings.wait)
                            .await?;
                    debug!(tx_hash = %tx_hash, status = ?receipt.status, "registration final");
                    record.registration_tx_hash = None;
                } else if record.status != AccountStatus::Registering
                    && !self.follow_deployment(&mut base, &mut record).await?
                {
                    return self.commit(&base, &record).await;
                }
            }
            AccountStatus::Deployed | AccountStatus::Registered => {}
        }

        self.read_chain_state(&mut record).await?;
        self.commit(&base, &record).await
    }

    /// Follow the backend's deploy transaction. Returns false when the
    /// account is known not to be on chain yet, or when another writer
    /// changed the record meanwhile.
    async fn follow_deployment(
        &self,
        base: &mut DeploymentRecord,
        record: &mut DeploymentRecord,
    ) -> Result<bool, AccountError> {
        let deploy = self
            .backend
            .deploy_transaction(self.address, &self.chain_id)
            .await?;

        let Some(deploy) = deploy else {
            return Ok(true);
        };
        record.deploy_tx_hash = Some(deploy.transaction_hash);

        match deploy.status {
            DeployStatus::Accepted => Ok(true),
            DeployStatus::Rejected => {
                warn!(address = %self.address, tx_hash = %deploy.transaction_hash, "deploy rejected");
                self.transition(record, AccountStatus::Counterfactual);
                Ok(false)
            }
            DeployStatus::Pending => {
                self.transition(record, AccountStatus::Deploying);
                if !self.save_unless_changed(base, record).await? {
                    return Ok(false);
                }
                *base = record.clone();

                let receipt = wait_for_transaction(
                    self.provider.as_ref(),
                    deploy.transaction_hash,
                    &self.settings.wait,
                )
                .await?;
                if receipt.status.is_accepted() {
                    Ok(true)
                } else {
                    warn!(
                        address = %self.address,
                        tx_hash = %deploy.transaction_hash,
                        status = ?receipt.status,
                        "deploy did not land"
                    );
                    self.transition(record, AccountStatus::Counterfactual);
                    Ok(false)
                }
            }
        }
    }

    async fn read_chain_state(&self, record: &mut DeploymentRecord) -> Result<(), AccountError> {
        let Some(class_hash) = self.provider.get_class_hash_at(self.address).await? else {
            self.transition(record, AccountStatus::Counterfactual);
            record.class_hash = None;
            return Ok(());
        };

        record.class_hash = Some(class_hash);
        record.updated = self
            .settings
            .latest_class_hash
            .map_or(true, |latest| latest == class_hash);
        if !record.updated {
            warn!(address = %self.address, class_hash = %class_hash, "account class is outdated");
        }

        let registered = self
            .provider
            .call(&NormalizedCall {
                contract_address: self.address,
                entrypoint: self.settings.introspection_entrypoint.clone(),
                calldata: vec![self.public_key],
            })
            .await?
            .first()
            .is_some_and(|flag| !flag.is_zero());

        let status = if registered {
            AccountStatus::Registered
        } else {
            AccountStatus::Deployed
        };
        self.transition(record, status);
        Ok(())
    }

    /// Re-sync every `interval` until the handle is aborted
    pub fn spawn_periodic_sync(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sync().await;
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TRANSITIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Ask the backend to deploy; no-op once deployed
    pub async fn request_deployment(&self) -> Result<Option<Felt>, AccountError> {
        if self.status().await?.is_deployed() {
            return Ok(None);
        }
        let tx_hash = self
            .backend
            .deploy_account(self.address, &self.chain_id)
            .await?;
        self.mark_deploying(tx_hash).await?;
        Ok(Some(tx_hash))
    }

    pub async fn mark_deploying(&self, tx_hash: Felt) -> Result<(), AccountError> {
        self.update(|record| {
            record.deploy_tx_hash = Some(tx_hash);
            self.transition(record, AccountStatus::Deploying);
        })
        .await
    }

    /// Cache a signed registration to ride along with the next execution
    pub async fn cache_registration(
        &self,
        registration: &PendingRegistration,
    ) -> Result<(), AccountError> {
        self.storage
            .set_json(&self.registration_key(), registration)
            .await?;
        self.update(|record| self.transition(record, AccountStatus::PendingRegister))
            .await
    }

    pub async fn pending_registration(&self) -> Result<Option<PendingRegistration>, AccountError> {
        Ok(self.storage.get_json(&self.registration_key()).await?)
    }

    /// Registration broadcast; the cached invocation is consumed
    pub async fn mark_registering(&self, tx_hash: Felt) -> Result<(), AccountError> {
        self.update(|record| {
            record.registration_tx_hash = Some(tx_hash);
            self.transition(record, AccountStatus::Registering);
        })
        .await?;
        self.storage.remove(&self.registration_key()).await?;
        Ok(())
    }

    pub async fn mark_registered(&self) -> Result<(), AccountError> {
        self.update(|record| {
            record.registration_tx_hash = None;
            self.transition(record, AccountStatus::Registered);
        })
        .await
    }

    /// Drop a failed or stale registration and fall back to `DEPLOYED`
    pub async fn abandon_registration(&self) -> Result<(), AccountError> {
        self.storage.remove(&self.registration_key()).await?;
        self.update(|record| {
            record.registration_tx_hash = None;
            self.transition(record, AccountStatus::Deployed);
        })
        .await
    }
}

impl std::fmt::Debug for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountState")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}
