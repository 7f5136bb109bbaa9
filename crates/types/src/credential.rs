use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Felt;

/// Signer credential attached to a controller account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credential {
    /// Platform passkey; `public_key` is the base64url SEC1 P-256 point
    #[serde(rename_all = "camelCase")]
    Webauthn {
        credential_id: String,
        public_key: String,
        rp_id: String,
    },

    /// External Ethereum wallet signing EIP-191 personal messages
    Eip191 { address: String },

    /// Key derived from a password with PBKDF2; only the public half is stored
    #[serde(rename_all = "camelCase")]
    Password { public_key: Felt, salt: String },

    /// External Solana wallet (sign-in-with-solana)
    Siws { address: String },

    /// Raw Stark private key
    #[serde(rename_all = "camelCase")]
    Starknet { private_key: Felt },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Webauthn,
    Eip191,
    Password,
    Siws,
    Starknet,
}

impl Credential {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::Webauthn { .. } => CredentialKind::Webauthn,
            Credential::Eip191 { .. } => CredentialKind::Eip191,
            Credential::Password { .. } => CredentialKind::Password,
            Credential::Siws { .. } => CredentialKind::Siws,
            Credential::Starknet { .. } => CredentialKind::Starknet,
        }
    }
}

impl CredentialKind {
    /// Signing needs a human in the loop (authenticator gesture or wallet popup)
    pub fn requires_user_presence(&self) -> bool {
        matches!(
            self,
            CredentialKind::Webauthn | CredentialKind::Eip191 | CredentialKind::Siws
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Webauthn => "webauthn",
            CredentialKind::Eip191 => "eip191",
            CredentialKind::Password => "password",
            CredentialKind::Siws => "siws",
            CredentialKind::Starknet => "starknet",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webauthn" => Ok(CredentialKind::Webauthn),
            "eip191" => Ok(CredentialKind::Eip191),
            "password" => Ok(CredentialKind::Password),
            "siws" => Ok(CredentialKind::Siws),
            "starknet" => Ok(CredentialKind::Starknet),
            other => Err(format!("unknown credential kind: {other}")),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Webauthn {
                credential_id,
                rp_id,
                ..
            } => f
                .debug_struct("Webauthn")
                .field("credential_id", credential_id)
                .field("rp_id", rp_id)
                .finish_non_exhaustive(),
            Credential::Eip191 { address } => {
                f.debug_struct("Eip191").field("address", address).finish()
            }
            Credential::Password { public_key, .. } => f
                .debug_struct("Password")
                .field("public_key", public_key)
                .finish_non_exhaustive(),
            Credential::Siws { address } => {
                f.debug_struct("Siws").field("address", address).finish()
            }
            Credential::Starknet { .. } => f
                .debug_struct("Starknet")
                .field("private_key", &"<redacted>")
                .finish(),
        }
    }
}
