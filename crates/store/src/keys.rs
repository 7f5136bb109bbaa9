//! Key namespace, version `0.0.3`.
//!
//! | key | value |
//! |-----|-------|
//! | `version` | layout version string |
//! | `active` | address of the connected account |
//! | `@account/<address>` | `AccountRecord` |
//! | `@session/<address>/<origin>` | `Session` |
//! | `@deployment/<address>/<chainId>` | `DeploymentRecord` |
//! | `@register/<address>/<chainId>/set_public_key` | `PendingRegistration` |
//! | `@nonce/<address>/<chainId>` | cached account nonce |
//! | `@sync/<address>/<chainId>` | unix millis of the last sync |
//!
//! Addresses are always rendered in fixed 64-digit hex.

use keychain_types::Felt;

pub const VERSION: &str = "version";
pub const ACTIVE: &str = "active";

pub const ACCOUNT_PREFIX: &str = "@account/";
pub const SESSION_PREFIX: &str = "@session/";
pub const DEPLOYMENT_PREFIX: &str = "@deployment/";
pub const REGISTER_PREFIX: &str = "@register/";
pub const NONCE_PREFIX: &str = "@nonce/";
pub const SYNC_PREFIX: &str = "@sync/";

pub const REGISTER_SUFFIX: &str = "/set_public_key";

pub fn account(address: &Felt) -> String {
    format!("{ACCOUNT_PREFIX}{}", address.to_fixed_hex())
}

pub fn session(address: &Felt, origin: &str) -> String {
    format!("{SESSION_PREFIX}{}/{origin}", address.to_fixed_hex())
}

/// Prefix of every session owned by `address`
pub fn sessions_of(address: &Felt) -> String {
    format!("{SESSION_PREFIX}{}/", address.to_fixed_hex())
}

pub fn deployment(address: &Felt, chain_id: &str) -> String {
    format!("{DEPLOYMENT_PREFIX}{}/{chain_id}", address.to_fixed_hex())
}

pub fn registration(address: &Felt, chain_id: &str) -> String {
    format!(
        "{REGISTER_PREFIX}{}/{chain_id}{REGISTER_SUFFIX}",
        address.to_fixed_hex()
    )
}

pub fn nonce(address: &Felt, chain_id: &str) -> String {
    format!("{NONCE_PREFIX}{}/{chain_id}", address.to_fixed_hex())
}

pub fn last_sync(address: &Felt, chain_id: &str) -> String {
    format!("{SYNC_PREFIX}{}/{chain_id}", address.to_fixed_hex())
}

/// Every key scoped to `address`, used when disconnecting
pub fn is_scoped_to(key: &str, address: &Felt) -> bool {
    let addr = address.to_fixed_hex();
    [
        SESSION_PREFIX,
        DEPLOYMENT_PREFIX,
        REGISTER_PREFIX,
        NONCE_PREFIX,
        SYNC_PREFIX,
    ]
    .iter()
    .any(|prefix| {
        key.strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(addr.as_str()))
            .is_some_and(|rest| rest.starts_with('/'))
    }) || key == account(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let address = Felt::from_u64(0xabc);
        let fixed = address.to_fixed_hex();

        assert_eq!(account(&address), format!("@account/{fixed}"));
        assert_eq!(
            session(&address, "https://game.example"),
            format!("@session/{fixed}/https://game.example")
        );
        assert_eq!(
            registration(&address, "SN_MAIN"),
            format!("@register/{fixed}/SN_MAIN/set_public_key")
        );
    }

    #[test]
    fn test_is_scoped_to() {
        let a = Felt::from_u64(1);
        let b = Felt::from_u64(2);

        assert!(is_scoped_to(&nonce(&a, "SN_MAIN"), &a));
        assert!(is_scoped_to(&account(&a), &a));
        assert!(!is_scoped_to(&nonce(&b, "SN_MAIN"), &a));
        assert!(!is_scoped_to(ACTIVE, &a));
    }
}
