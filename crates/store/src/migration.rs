//! Upgrade of the persisted key layout.
//!
//! `0.0.2` kept a single account's data under flat keys
//! (`@session/<origin>`, `@deployment/<chainId>`,
//! `@register/<chainId>/set_public_key`, `@nonce/<chainId>`). `0.0.3` scopes
//! every such key by the owning address. The flat keys belonged to whatever
//! account `active` pointed at, so they are rewritten under that address.
//!
//! Each key is copied before the original is removed and `version` is
//! written last, so an interrupted migration simply runs again on the next
//! load. Keys already scoped by the active address are skipped, which keeps
//! re-runs idempotent.

use keychain_types::{parse_address, STORAGE_VERSION};
use tracing::{info, warn};

use crate::keys;
use crate::store::{KeyValueStore, StoreError};

pub const LEGACY_VERSION: &str = "0.0.2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    UpToDate,
    /// Empty store stamped with the current version
    Initialized,
    Migrated {
        from: String,
        rewritten: usize,
        dropped: usize,
    },
}

/// Bring `store` to the current layout version
pub async fn migrate(store: &dyn KeyValueStore) -> Result<MigrationOutcome, StoreError> {
    let version = store.get(keys::VERSION).await?.map(|raw| decode_string(&raw));

    match version.as_deref() {
        Some(STORAGE_VERSION) => return Ok(MigrationOutcome::UpToDate),
        Some(LEGACY_VERSION) => {}
        Some(other) => return Err(StoreError::UnsupportedVersion(other.to_string())),
        None => {
            // stores written before versioning are treated as 0.0.2
            if store.keys().await?.is_empty() {
                write_version(store).await?;
                return Ok(MigrationOutcome::Initialized);
            }
        }
    }

    let active = match store.get(keys::ACTIVE).await? {
        Some(raw) => parse_address(&decode_string(&raw)).ok(),
        None => None,
    };

    let mut rewritten = 0;
    let mut dropped = 0;

    for key in store.keys().await? {
        if let Some(canonical) = canonical_account_key(&key) {
            if let Some(value) = store.get(&key).await? {
                store.set(&canonical, &value).await?;
                store.remove(&key).await?;
                rewritten += 1;
            }
            continue;
        }

        let Some(rest) = legacy_suffix(&key) else {
            continue;
        };
        let (prefix, suffix) = rest;

        match &active {
            Some(address) => {
                let scope = address.to_fixed_hex();
                if suffix.starts_with(&format!("{scope}/")) {
                    continue;
                }
                let Some(value) = store.get(&key).await? else {
                    continue;
                };
                let new_key = format!("{prefix}{scope}/{suffix}");
                store.set(&new_key, &value).await?;
                store.remove(&key).await?;
                rewritten += 1;
            }
            None => {
                warn!(key = %key, "dropping legacy key with no active account to own it");
                store.remove(&key).await?;
                dropped += 1;
            }
        }
    }

    if let Some(address) = &active {
        store
            .set(keys::ACTIVE, &encode_string(&address.to_fixed_hex()))
            .await?;
    }
    write_version(store).await?;

    let from = version.unwrap_or_else(|| LEGACY_VERSION.to_string());
    info!(
        from = %from,
        to = STORAGE_VERSION,
        rewritten,
        dropped,
        "migrated storage layout"
    );

    Ok(MigrationOutcome::Migrated {
        from,
        rewritten,
        dropped,
    })
}

/// Split a legacy address-less key into (prefix, remainder)
fn legacy_suffix(key: &str) -> Option<(&'static str, &str)> {
    [
        keys::SESSION_PREFIX,
        keys::DEPLOYMENT_PREFIX,
        keys::REGISTER_PREFIX,
        keys::NONCE_PREFIX,
    ]
    .into_iter()
    .find_map(|prefix| key.strip_prefix(prefix).map(|rest| (prefix, rest)))
    .filter(|(_, rest)| !rest.is_empty())
}

/// `@account/<address>` with a non-canonical address rendering
fn canonical_account_key(key: &str) -> Option<String> {
    let address = parse_address(key.strip_prefix(keys::ACCOUNT_PREFIX)?).ok()?;
    let canonical = keys::account(&address);
    (canonical != key).then_some(canonical)
}

async fn write_version(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store
        .set(keys::VERSION, &encode_string(STORAGE_VERSION))
        .await
}

// Older writers stored some strings without JSON quoting.
fn decode_string(raw: &str) -> String {
    serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
}

fn encode_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
