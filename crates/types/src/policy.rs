use serde::{Deserialize, Serialize};

use crate::{canonical_address, Felt};

/// Authorization for one (target contract, method) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub target: String,
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,

    /// UI bookkeeping, never persisted in a verified session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// UI bookkeeping, never persisted in a verified session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Identity of a policy for set comparisons
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    pub target: String,
    pub method: String,
}

impl Policy {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            authorized: None,
            id: None,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_authorized(mut self, authorized: bool) -> Self {
        self.authorized = Some(authorized);
        self
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey {
            target: canonical_address(&self.target),
            method: self.method.trim().to_string(),
        }
    }

    /// Structural equality: same canonical target and method
    pub fn same_as(&self, other: &Policy) -> bool {
        self.key() == other.key()
    }

    /// Explicitly declined by the user
    pub fn is_denied(&self) -> bool {
        self.authorized == Some(false)
    }

    pub fn strip_ui_fields(mut self) -> Self {
        self.id = None;
        self.description = None;
        self
    }
}

/// An approved, origin-scoped bundle of policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub address: Felt,
    pub origin: String,
    pub policies: Vec<Policy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee: Option<Felt>,
    /// Unix seconds
    pub expires_at: u64,
    #[serde(default)]
    pub verified: bool,
    /// Unix seconds
    pub created_at: u64,
}

impl Session {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Policies the user actually granted
    pub fn granted(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter(|p| !p.is_denied())
    }
}
