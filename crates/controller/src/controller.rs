use std::sync::Arc;

use keychain_account::{AccountState, NonceCache, SyncOutcome};
use keychain_callbacks::{
    navigation_target, ApprovalError, CallbackError, CallbackId, CallbackReceiver, CallbackRegistry,
    HeadlessApprovalRequest, HeadlessApprovals,
};
use keychain_config::ControllerConfig;
use keychain_executor::{ExecuteOptions, ExecutionCoordinator, ExecutionOutcome};
use keychain_provider::{BackendApi, ChainProvider, Paymaster};
use keychain_session::{diff, SessionPolicyStore};
use keychain_signer::{build_signer, ChainHasher, CredentialSigner, SignerContext};
use keychain_store::{keys, Storage};
use keychain_types::{
    AccountRecord, AccountStatus, Call, CredentialKind, ExecuteResponse, Felt, PendingRegistration,
    Policy, Session,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::builder::{ControllerBuilder, ControllerSettings, ProviderFactory};
use crate::error::ControllerError;
use crate::telemetry::{ErrorContext, ExecutionSpan};

/// Route of the view that confirms a session request
pub const SESSION_ROUTE: &str = "/session";

// ═══════════════════════════════════════════════════════════════════════════
// RESPONSES
// ═══════════════════════════════════════════════════════════════════════════

/// Parameters handed to the session confirmation view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub address: Felt,
    pub origin: String,
    pub policies: Vec<Policy>,
    /// Policies not already granted to the origin
    pub missing: Vec<Policy>,
}

pub enum ConnectOutcome {
    /// The origin's session already covers the request, or it was auto-provisioned
    Connected { address: Felt, session: Session },
    /// Navigate to `target`; the view settles `callback_id` through
    /// [`Controller::confirm_session`] or [`Controller::cancel_request`]
    ApprovalRequired {
        callback_id: CallbackId,
        target: String,
        receiver: CallbackReceiver<Session>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeadlessConnectResponse {
    Success {
        address: Felt,
    },
    #[serde(rename_all = "camelCase")]
    UserInteractionRequired {
        approval_request_id: String,
        expires_at: u64,
    },
}

/// Summary of the connected account, as seen by one origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponse {
    pub address: Felt,
    pub username: String,
    pub chain_id: String,
    pub status: AccountStatus,
    /// False when the deployed class is not the latest version
    pub updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_hash: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTION STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct ChainHandle {
    chain_id: String,
    rpc_url: String,
    provider: Arc<dyn ChainProvider>,
}

struct Connection {
    record: AccountRecord,
    signer: Arc<dyn CredentialSigner>,
    coordinator: Arc<ExecutionCoordinator>,
    sync_task: Option<JoinHandle<()>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }
}

/// Cheap clone of the live connection, taken so no lock is held across awaits
#[derive(Clone)]
struct Active {
    record: AccountRecord,
    signer: Arc<dyn CredentialSigner>,
    coordinator: Arc<ExecutionCoordinator>,
}

impl Active {
    fn address(&self) -> Felt {
        self.record.address
    }

    fn account(&self) -> &Arc<AccountState> {
        self.coordinator.account()
    }

    fn sessions(&self) -> &SessionPolicyStore {
        self.coordinator.sessions()
    }
}

/// Headless connect parked until its approval settles
struct HeadlessContext {
    request_id: String,
    record: AccountRecord,
    signer: Arc<dyn CredentialSigner>,
    /// Clears the slot once the approval TTL has passed
    expiry: JoinHandle<()>,
}

impl Drop for HeadlessContext {
    fn drop(&mut self) {
        self.expiry.abort();
    }
}

type HeadlessSlot = Arc<Mutex<Option<HeadlessContext>>>;

fn expire_headless(
    slot: HeadlessSlot,
    request_id: String,
    ttl: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        let mut slot = slot.lock().await;
        if slot
            .as_ref()
            .is_some_and(|context| context.request_id == request_id)
        {
            // aborting our own handle here is a no-op, nothing is awaited after
            slot.take();
            debug!(approval_request_id = %request_id, "parked headless connect expired");
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════

/// Account controller handle passed to the embedding app.
///
/// Owns the connected account's components and the request registries;
/// nothing is process-global, so two controllers never share state beyond
/// the storage they were given.
pub struct Controller {
    config: ControllerConfig,
    settings: ControllerSettings,
    storage: Storage,
    providers: Arc<dyn ProviderFactory>,
    backend: Arc<dyn BackendApi>,
    paymaster: Option<Arc<dyn Paymaster>>,
    signer_context: SignerContext,
    hasher: Arc<dyn ChainHasher>,
    chain: RwLock<ChainHandle>,
    connection: RwLock<Option<Connection>>,
    session_requests: CallbackRegistry<Session>,
    approvals: HeadlessApprovals,
    headless: HeadlessSlot,
    /// Held by every execution, across coordinator swaps
    execution_lock: Arc<Mutex<()>>,
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ControllerConfig,
        settings: ControllerSettings,
        storage: Storage,
        chain_id: String,
        rpc_url: String,
        provider: Arc<dyn ChainProvider>,
        providers: Arc<dyn ProviderFactory>,
        backend: Arc<dyn BackendApi>,
        paymaster: Option<Arc<dyn Paymaster>>,
        signer_context: SignerContext,
        hasher: Arc<dyn ChainHasher>,
    ) -> Self {
        let approvals = HeadlessApprovals::new(settings.headless_ttl);
        Self {
            config,
            settings,
            storage,
            providers,
            backend,
            paymaster,
            signer_context,
            hasher,
            chain: RwLock::new(ChainHandle {
                chain_id,
                rpc_url,
                provider,
            }),
            connection: RwLock::new(None),
            session_requests: CallbackRegistry::new(),
            approvals,
            headless: Arc::new(Mutex::new(None)),
            execution_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub async fn chain_id(&self) -> String {
        self.chain.read().await.chain_id.clone()
    }

    pub async fn rpc_url(&self) -> String {
        self.chain.read().await.rpc_url.clone()
    }

    /// Address of the connected account
    pub async fn address(&self) -> Option<Felt> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|connection| connection.record.address)
    }

    pub fn pending_headless_approval(&self) -> Option<HeadlessApprovalRequest> {
        self.approvals.pending()
    }

    #[cfg(test)]
    pub(crate) async fn parked_headless(&self) -> Option<String> {
        self.headless
            .lock()
            .await
            .as_ref()
            .map(|context| context.request_id.clone())
    }

    /// Session requests still waiting on their confirmation view
    pub fn outstanding_requests(&self) -> usize {
        self.session_requests.len()
    }

    async fn active(&self) -> Option<Active> {
        self.connection.read().await.as_ref().map(|connection| Active {
            record: connection.record.clone(),
            signer: connection.signer.clone(),
            coordinator: connection.coordinator.clone(),
        })
    }

    async fn require_active(&self) -> Result<Active, ControllerError> {
        self.active().await.ok_or(ControllerError::NotConnected)
    }

    /// Wire up the account on the current chain and make it the active one
    async fn establish(
        &self,
        record: AccountRecord,
        signer: Arc<dyn CredentialSigner>,
    ) -> Result<Felt, ControllerError> {
        let chain = self.chain.read().await.clone();
        let address = record.address;

        let account = Arc::new(
            AccountState::load(
                address,
                chain.chain_id.clone(),
                signer.public_key(),
                self.storage.clone(),
                chain.provider.clone(),
                self.backend.clone(),
                self.settings.account.clone(),
            )
            .await,
        );
        let nonces = NonceCache::new(
            self.storage.clone(),
            chain.provider.clone(),
            address,
            chain.chain_id.clone(),
        );
        let sessions =
            SessionPolicyStore::new(self.storage.clone(), address, self.settings.session.clone());

        let mut coordinator = ExecutionCoordinator::new(
            account.clone(),
            nonces,
            sessions,
            signer.clone(),
            self.hasher.clone(),
            chain.provider.clone(),
        )
        .with_settings(self.settings.executor.clone())
        .with_lock(self.execution_lock.clone());
        if let Some(paymaster) = &self.paymaster {
            coordinator = coordinator.with_paymaster(paymaster.clone());
        }

        self.storage
            .set_json(&keys::account(&address), &record)
            .await?;
        self.storage.set_active_address(&address).await?;

        let sync_task = self
            .settings
            .sync_interval
            .map(|interval| account.clone().spawn_periodic_sync(interval));

        info!(
            address = %address,
            username = %record.username,
            credential = %record.credential.kind(),
            chain_id = %chain.chain_id,
            "account connected"
        );

        let coordinator = Arc::new(coordinator);
        *self.connection.write().await = Some(Connection {
            record,
            signer,
            coordinator: coordinator.clone(),
            sync_task,
        });

        if self.settings.register_on_connect {
            // best effort; the next connect tries again
            if let Err(e) = coordinator.prepare_registration().await {
                warn!(address = %address, error = %e, "could not prepare key registration");
            }
        }
        Ok(address)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCOUNT
    // ═══════════════════════════════════════════════════════════════════════

    /// Reconnect the account stored as active. Password credentials need
    /// the password again; nothing secret is persisted.
    pub async fn restore(&self, password: Option<&str>) -> Result<Option<Felt>, ControllerError> {
        let Some(address) = self.storage.active_address().await? else {
            return Ok(None);
        };
        let Some(record) = self
            .storage
            .get_json::<AccountRecord>(&keys::account(&address))
            .await?
        else {
            warn!(address = %address, "active account has no stored record");
            return Ok(None);
        };
        let signer = build_signer(&record.credential, &self.signer_context, password)?;
        self.establish(record, signer).await.map(Some)
    }

    /// Connect `username` without a UI. Credentials that need a human
    /// gesture park the connection behind a headless approval.
    pub async fn headless_connect(
        &self,
        username: &str,
        kind: CredentialKind,
        password: Option<&str>,
    ) -> Result<HeadlessConnectResponse, ControllerError> {
        let record = self
            .backend
            .account(username)
            .await?
            .ok_or_else(|| ControllerError::AccountNotFound(username.to_string()))?;

        let actual = record.credential.kind();
        if actual != kind {
            return Err(ControllerError::CredentialMismatch {
                requested: kind,
                actual,
            });
        }

        let signer = build_signer(&record.credential, &self.signer_context, password)?;

        if kind.requires_user_presence() {
            let request = self.approvals.create()?;
            info!(
                username = %username,
                approval_request_id = %request.id,
                "headless connect waiting for approval"
            );
            let expiry = expire_headless(
                self.headless.clone(),
                request.id.clone(),
                self.approvals.ttl(),
            );
            *self.headless.lock().await = Some(HeadlessContext {
                request_id: request.id.clone(),
                record,
                signer,
                expiry,
            });
            return Ok(HeadlessConnectResponse::UserInteractionRequired {
                approval_request_id: request.id,
                expires_at: request.expires_at,
            });
        }

        let address = self.establish(record, signer).await?;
        Ok(HeadlessConnectResponse::Success { address })
    }

    /// Approve the pending headless request, out of band
    pub fn approve_headless(&self, request_id: &str) -> Result<(), ControllerError> {
        self.approvals.resolve(request_id)?;
        Ok(())
    }

    pub fn reject_headless(&self, request_id: &str, reason: &str) -> Result<(), ControllerError> {
        self.approvals.reject(request_id, reason)?;
        Ok(())
    }

    /// Block until the headless request settles, then finish connecting
    pub async fn wait_for_headless_approval(
        &self,
        request_id: &str,
    ) -> Result<Felt, ControllerError> {
        let outcome = self.approvals.wait(request_id).await;

        let context = {
            let mut slot = self.headless.lock().await;
            match slot.as_ref() {
                Some(context) if context.request_id == request_id => slot.take(),
                _ => None,
            }
        };

        if let Err(e) = outcome {
            warn!(approval_request_id = %request_id, error = %e, "headless connect not approved");
            return Err(e.into());
        }
        let context = context.ok_or_else(|| ApprovalError::NotFound(request_id.to_string()))?;
        // the context aborts its expiry task when dropped
        self.establish(context.record.clone(), context.signer.clone())
            .await
    }

    /// Sign and cache the plugin-key registration of the connected account.
    /// It is sent together with the next execution.
    pub async fn register_key(&self) -> Result<Option<PendingRegistration>, ControllerError> {
        let active = self.require_active().await?;
        Ok(active.coordinator.prepare_registration().await?)
    }

    /// Ask the backend to deploy the connected account
    pub async fn deploy(&self) -> Result<Option<Felt>, ControllerError> {
        let active = self.require_active().await?;
        let tx_hash = active.account().request_deployment().await?;
        match tx_hash {
            Some(hash) => info!(address = %active.address(), tx_hash = %hash, "deployment requested"),
            None => debug!(address = %active.address(), "account already deployed"),
        }
        Ok(tx_hash)
    }

    pub async fn probe(&self, origin: &str) -> Result<ProbeResponse, ControllerError> {
        let active = self.require_active().await?;
        let account = active.account();
        let record = account.record().await?;

        Ok(ProbeResponse {
            address: active.address(),
            username: active.record.username.clone(),
            chain_id: account.chain_id().to_string(),
            status: record.status,
            updated: record.updated,
            class_hash: record.class_hash,
            session: active.sessions().active(origin).await?,
        })
    }

    /// Reconcile account status with the chain now, ignoring the debounce
    pub async fn sync(&self) -> Result<SyncOutcome, ControllerError> {
        let active = self.require_active().await?;
        Ok(active.account().force_sync().await)
    }

    /// Point the controller at another chain. Accepts an RPC URL or the
    /// name or chain id of a configured chain. The connected account, if
    /// any, is re-synced against the new chain.
    pub async fn switch_chain(&self, rpc_url_or_chain: &str) -> Result<String, ControllerError> {
        let rpc_url = if rpc_url_or_chain.starts_with("http://")
            || rpc_url_or_chain.starts_with("https://")
        {
            rpc_url_or_chain.to_string()
        } else {
            self.config
                .chain(rpc_url_or_chain)
                .map(|chain| chain.rpc_url.clone())
                .ok_or_else(|| ControllerError::UnknownChain(rpc_url_or_chain.to_string()))?
        };

        let provider = self.providers.connect(&rpc_url);
        let chain_id = provider.chain_id().await?;

        *self.chain.write().await = ChainHandle {
            chain_id: chain_id.clone(),
            rpc_url: rpc_url.clone(),
            provider,
        };
        info!(chain_id = %chain_id, rpc_url = %rpc_url, "chain switched");

        let previous = self.connection.write().await.take();
        if let Some(connection) = previous {
            let record = connection.record.clone();
            let signer = connection.signer.clone();
            drop(connection);
            self.establish(record, signer).await?;
        }
        Ok(chain_id)
    }

    /// Forget the connected account and settle everything outstanding
    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        let cancelled = self.session_requests.cancel_all();
        if let Some(request) = self.approvals.pending() {
            if let Err(e) = self.approvals.reject(&request.id, "disconnected") {
                debug!(error = %e, "pending approval already settled");
            }
        }
        *self.headless.lock().await = None;

        let Some(connection) = self.connection.write().await.take() else {
            return Ok(());
        };
        let address = connection.record.address;
        drop(connection);

        let removed = self.storage.forget_account(&address).await?;
        info!(address = %address, removed, cancelled, "account disconnected");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SESSIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Request a session for `origin`. `verified` marks a policy set vetted
    /// ahead of time; those skip the prompt unless they touch a sensitive
    /// method.
    pub async fn connect(
        &self,
        origin: &str,
        policies: &[Policy],
        verified: bool,
    ) -> Result<ConnectOutcome, ControllerError> {
        let active = self.require_active().await?;
        let sessions = active.sessions();
        let address = active.address();

        if sessions.is_requested_session(origin, policies).await? {
            if let Some(session) = sessions.active(origin).await? {
                debug!(origin = %origin, "existing session covers request");
                return Ok(ConnectOutcome::Connected { address, session });
            }
        }

        if !sessions.requires_session_approval(policies, verified) {
            let session = sessions
                .create_verified_session(origin, policies, None)
                .await?;
            return Ok(ConnectOutcome::Connected { address, session });
        }

        let granted: Vec<Policy> = match sessions.active(origin).await? {
            Some(session) => session.granted().cloned().collect(),
            None => Vec::new(),
        };
        let request = SessionRequest {
            address,
            origin: origin.to_string(),
            policies: policies.to_vec(),
            missing: diff(policies, &granted),
        };

        let (callback_id, receiver) = self.session_requests.register(None);
        let target = match navigation_target(SESSION_ROUTE, &request, callback_id) {
            Ok(target) => target,
            Err(e) => {
                self.session_requests.cleanup_callbacks(callback_id);
                return Err(e.into());
            }
        };
        info!(
            origin = %origin,
            callback_id,
            missing = request.missing.len(),
            "session approval required"
        );
        Ok(ConnectOutcome::ApprovalRequired {
            callback_id,
            target,
            receiver,
        })
    }

    /// Called by the confirmation view once the user approved `policies`
    pub async fn confirm_session(
        &self,
        callback_id: CallbackId,
        origin: &str,
        policies: &[Policy],
        max_fee: Option<Felt>,
    ) -> Result<Session, ControllerError> {
        let callbacks = self
            .session_requests
            .get_callbacks(callback_id)
            .ok_or(CallbackError::UnknownId(callback_id))?;

        let approved = match self.require_active().await {
            Ok(active) => active
                .sessions()
                .approve(origin, policies, max_fee)
                .await
                .map_err(ControllerError::from),
            Err(e) => Err(e),
        };

        let settled = match approved {
            Ok(session) => {
                callbacks.resolve(session.clone());
                Ok(session)
            }
            Err(e) => {
                callbacks.reject(e.to_string());
                Err(e)
            }
        };
        self.session_requests.cleanup_callbacks(callback_id);
        settled
    }

    /// User dismissed the view; the waiter sees a cancellation
    pub fn cancel_request(&self, callback_id: CallbackId) -> Result<(), ControllerError> {
        self.session_requests.cancel(callback_id)?;
        info!(callback_id, "request cancelled");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn execute(
        &self,
        origin: &str,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> ExecuteResponse {
        let Some(active) = self.active().await else {
            return ExecuteResponse::not_connected();
        };
        self.run(&active, origin, calls, options).await
    }

    /// Replay the batch that returned `USER_INTERACTION_REQUIRED` after the
    /// user confirmed it. With `remember`, the missing policies are added
    /// to the origin's session so the same calls pass next time.
    pub async fn resume_execution(&self, remember: bool) -> ExecuteResponse {
        let Some(active) = self.active().await else {
            return ExecuteResponse::not_connected();
        };
        let Some(pending) = active.coordinator.take_pending_execution().await else {
            return ExecuteResponse::error(ControllerError::NothingToResume.to_structured());
        };

        if remember {
            let extended = self
                .extend_session(&active, &pending.origin, &pending.missing_policies)
                .await;
            if let Err(e) = extended {
                warn!(origin = %pending.origin, error = %e, "could not extend session");
            }
        }

        let options = ExecuteOptions {
            skip_authorization: true,
            ..ExecuteOptions::default()
        };
        self.run(&active, &pending.origin, &pending.calls, &options).await
    }

    async fn extend_session(
        &self,
        active: &Active,
        origin: &str,
        missing: &[Policy],
    ) -> Result<Session, ControllerError> {
        let sessions = active.sessions();
        let (mut policies, max_fee) = match sessions.active(origin).await? {
            Some(session) => (session.granted().cloned().collect::<Vec<_>>(), session.max_fee),
            None => (Vec::new(), None),
        };
        policies.extend(diff(missing, &policies));
        Ok(sessions.approve(origin, &policies, max_fee).await?)
    }

    async fn run(
        &self,
        active: &Active,
        origin: &str,
        calls: &[Call],
        options: &ExecuteOptions,
    ) -> ExecuteResponse {
        let span = ExecutionSpan::new(origin, active.address().to_hex());
        let correlation_id = span.correlation_id;

        let result = active
            .coordinator
            .execute(origin, calls, options)
            .instrument(span.span())
            .await
            .with_correlation_id(correlation_id);

        match result {
            Ok(ExecutionOutcome::Submitted {
                transaction_hash,
                path,
            }) => {
                info!(
                    correlation_id = %correlation_id,
                    tx_hash = %transaction_hash,
                    path = ?path,
                    "execution submitted"
                );
                ExecuteResponse::success(transaction_hash)
            }
            Ok(ExecutionOutcome::UserInteractionRequired { pending }) => {
                ExecuteResponse::user_interaction_required(pending.calls)
            }
            Err(e) => ExecuteResponse::error(e.to_structured()),
        }
    }

    /// Sign SNIP-12 style typed data with the connected credential
    pub async fn sign_message(&self, typed_data: &Value) -> Result<Vec<Felt>, ControllerError> {
        let active = self.require_active().await?;
        let signature = active
            .signer
            .sign_typed_data(self.hasher.as_ref(), typed_data, active.address())
            .await?;
        debug!(address = %active.address(), "message signed");
        Ok(signature)
    }

    /// Wait for background finality watchers of the connected account
    pub async fn drain(&self) {
        if let Some(active) = self.active().await {
            active.coordinator.drain_watchers().await;
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}
