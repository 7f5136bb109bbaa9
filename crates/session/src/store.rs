use keychain_store::{keys, Storage, StoreError};
use keychain_types::{Felt, NormalizedCall, Policy, PolicyKey, Session};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Methods that always need interactive consent, even for verified policies
pub const DEFAULT_SENSITIVE_METHODS: &[&str] = &[
    "approve",
    "increase_allowance",
    "increaseAllowance",
    "set_approval_for_all",
    "setApprovalForAll",
];

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid origin: {0:?}")]
    InvalidOrigin(String),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub sensitive_methods: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            sensitive_methods: DEFAULT_SENSITIVE_METHODS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Elements of `a` with no structural match in `b`, in `a`'s order
pub fn diff(a: &[Policy], b: &[Policy]) -> Vec<Policy> {
    let present: BTreeSet<PolicyKey> = b.iter().map(Policy::key).collect();
    a.iter()
        .filter(|policy| !present.contains(&policy.key()))
        .cloned()
        .collect()
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Persisted, origin-scoped policies for one account
#[derive(Debug, Clone)]
pub struct SessionPolicyStore {
    storage: Storage,
    address: Felt,
    settings: SessionSettings,
}

impl SessionPolicyStore {
    pub fn new(storage: Storage, address: Felt, settings: SessionSettings) -> Self {
        Self {
            storage,
            address,
            settings,
        }
    }

    pub fn address(&self) -> Felt {
        self.address
    }

    fn key(&self, origin: &str) -> Result<String, SessionError> {
        let origin = origin.trim();
        if origin.is_empty() || origin.chars().any(char::is_whitespace) {
            return Err(SessionError::InvalidOrigin(origin.to_string()));
        }
        Ok(keys::session(&self.address, origin))
    }

    async fn persist(
        &self,
        origin: &str,
        policies: Vec<Policy>,
        max_fee: Option<Felt>,
        verified: bool,
    ) -> Result<Session, SessionError> {
        let key = self.key(origin)?;
        let now = now_secs();
        let session = Session {
            address: self.address,
            origin: origin.trim().to_string(),
            policies,
            max_fee,
            expires_at: now.saturating_add(self.settings.ttl.as_secs()),
            verified,
            created_at: now,
        };
        self.storage.set_json(&key, &session).await?;
        info!(
            address = %self.address,
            origin = %session.origin,
            policies = session.policies.len(),
            verified,
            "session stored"
        );
        Ok(session)
    }

    /// Store the user's approval. Policies without an explicit decision
    /// count as granted; explicit denials are kept as denials.
    pub async fn approve(
        &self,
        origin: &str,
        policies: &[Policy],
        max_fee: Option<Felt>,
    ) -> Result<Session, SessionError> {
        let policies = policies
            .iter()
            .cloned()
            .map(|mut policy| {
                policy.authorized.get_or_insert(true);
                policy
            })
            .collect();
        self.persist(origin, policies, max_fee, false).await
    }

    /// Persist a verified policy set. UI-only fields are dropped and every
    /// policy is authorized, so nothing shown as pending is left out.
    pub async fn create_verified_session(
        &self,
        origin: &str,
        policies: &[Policy],
        max_fee: Option<Felt>,
    ) -> Result<Session, SessionError> {
        let policies = policies
            .iter()
            .cloned()
            .map(|policy| policy.strip_ui_fields().with_authorized(true))
            .collect();
        self.persist(origin, policies, max_fee, true).await
    }

    pub async fn get(&self, origin: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.storage.get_json(&self.key(origin)?).await?)
    }

    /// Live (unexpired) session for `origin`
    pub async fn active(&self, origin: &str) -> Result<Option<Session>, SessionError> {
        let now = now_secs();
        Ok(self.get(origin).await?.filter(|s| !s.is_expired(now)))
    }

    pub async fn revoke(&self, origin: &str) -> Result<(), SessionError> {
        self.storage.remove(&self.key(origin)?).await?;
        info!(address = %self.address, origin = %origin, "session revoked");
        Ok(())
    }

    /// Every stored session of this account, expired ones included
    pub async fn sessions(&self) -> Result<Vec<Session>, SessionError> {
        let mut sessions = Vec::new();
        for key in self
            .storage
            .keys_with_prefix(&keys::sessions_of(&self.address))
            .await?
        {
            if let Some(session) = self.storage.get_json::<Session>(&key).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// True iff every requested policy is granted by the live session
    pub async fn is_requested_session(
        &self,
        origin: &str,
        requested: &[Policy],
    ) -> Result<bool, SessionError> {
        let Some(session) = self.active(origin).await? else {
            return Ok(false);
        };
        let granted: Vec<Policy> = session.granted().cloned().collect();
        Ok(diff(requested, &granted).is_empty())
    }

    /// Whether `policies` need interactive consent before a session is created
    pub fn requires_session_approval(&self, policies: &[Policy], verified: bool) -> bool {
        if !verified {
            return true;
        }
        policies.iter().any(|policy| {
            self.settings
                .sensitive_methods
                .iter()
                .any(|method| method == policy.method.trim())
        })
    }

    /// Policies the calls need that the live session does not grant.
    /// Empty means authorized.
    pub async fn authorize_calls(
        &self,
        origin: &str,
        calls: &[NormalizedCall],
    ) -> Result<Vec<Policy>, SessionError> {
        let mut requested: Vec<Policy> = Vec::new();
        for call in calls {
            let policy = Policy::new(call.contract_address.to_fixed_hex(), call.entrypoint.clone());
            if !requested.iter().any(|p| p.same_as(&policy)) {
                requested.push(policy);
            }
        }

        let granted: Vec<Policy> = match self.active(origin).await? {
            Some(session) => session.granted().cloned().collect(),
            None => Vec::new(),
        };
        let missing = diff(&requested, &granted);
        if !missing.is_empty() {
            debug!(origin = %origin, missing = missing.len(), "calls not covered by session");
        }
        Ok(missing)
    }
}
