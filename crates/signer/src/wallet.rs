use async_trait::async_trait;
use keychain_types::{parse_address, CredentialKind, Felt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::encoding::SignerTypeTag;
use crate::error::SignerError;
use crate::signer::CredentialSigner;

/// External wallet (EIP-191 personal_sign, sign-in-with-solana)
#[async_trait]
pub trait ExternalWallet: Send + Sync {
    async fn sign_message(&self, address: &str, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// Signs by delegating to an external wallet.
///
/// Signature layout: `[type_tag, signer_id, sig_len, chunks...]` where the
/// raw wallet signature is split into 16-byte big-endian chunks.
pub struct WalletSigner {
    kind: CredentialKind,
    address: String,
    signer_id: Felt,
    wallet: Arc<dyn ExternalWallet>,
}

impl WalletSigner {
    pub fn new(
        kind: CredentialKind,
        address: impl Into<String>,
        wallet: Arc<dyn ExternalWallet>,
    ) -> Result<Self, SignerError> {
        let address = address.into();
        let signer_id = match kind {
            CredentialKind::Eip191 => parse_address(&address)
                .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?,
            // base58 addresses do not fit a felt directly
            CredentialKind::Siws => {
                let digest: [u8; 32] = Sha256::digest(address.as_bytes()).into();
                Felt::from_bytes_be(digest).mask_bits(250)
            }
            other => {
                return Err(SignerError::Wallet(format!(
                    "{other} credentials are not wallet backed"
                )))
            }
        };
        Ok(Self {
            kind,
            address,
            signer_id,
            wallet,
        })
    }

    fn tag(&self) -> SignerTypeTag {
        match self.kind {
            CredentialKind::Siws => SignerTypeTag::Siws,
            _ => SignerTypeTag::Eip191,
        }
    }
}

#[async_trait]
impl CredentialSigner for WalletSigner {
    fn kind(&self) -> CredentialKind {
        self.kind
    }

    fn public_key(&self) -> Felt {
        self.signer_id
    }

    async fn sign_hash(&self, hash: Felt) -> Result<Vec<Felt>, SignerError> {
        let message = hash.to_fixed_hex();
        debug!(address = %self.address, kind = %self.kind, "requesting wallet signature");
        let raw = self
            .wallet
            .sign_message(&self.address, message.as_bytes())
            .await?;
        if raw.is_empty() {
            return Err(SignerError::Wallet("wallet returned an empty signature".to_string()));
        }

        let mut out = vec![
            self.tag().felt(),
            self.signer_id,
            Felt::from_u64(raw.len() as u64),
        ];
        for chunk in raw.chunks(16) {
            out.push(
                Felt::from_be_slice(chunk).map_err(|e| SignerError::Wallet(e.to_string()))?,
            );
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK WALLET
// ═══════════════════════════════════════════════════════════════════════════

/// Deterministic 65-byte signatures; records every message it signs
#[derive(Clone, Default)]
pub struct MockWallet {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    rejecting: bool,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request is declined by the user
    pub fn rejecting() -> Self {
        Self {
            rejecting: true,
            ..Self::default()
        }
    }

    pub async fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl ExternalWallet for MockWallet {
    async fn sign_message(&self, address: &str, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.messages
            .lock()
            .await
            .push((address.to_string(), message.to_vec()));
        if self.rejecting {
            return Err(SignerError::UserCancelled);
        }

        let first = Sha256::new()
            .chain_update(address.as_bytes())
            .chain_update(message)
            .finalize();
        let second = Sha256::digest(first);
        let mut signature = first.to_vec();
        signature.extend(second);
        signature.push(27);
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_eip191_layout() {
        let wallet = MockWallet::new();
        let signer = WalletSigner::new(
            CredentialKind::Eip191,
            "0x00000000000000000000000000000000000000aa",
            Arc::new(wallet.clone()),
        )
        .unwrap();

        let signature = signer.sign_hash(Felt::from_u64(0xabc)).await.unwrap();
        assert_eq!(signature[0], SignerTypeTag::Eip191.felt());
        assert_eq!(signature[1], Felt::from_u64(0xaa));
        assert_eq!(signature[2], Felt::from_u64(65));
        // 65 bytes in 16-byte chunks
        assert_eq!(signature.len(), 3 + 5);

        let messages = wallet.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1, Felt::from_u64(0xabc).to_fixed_hex().into_bytes());
    }

    #[tokio::test]
    async fn test_siws_uses_hashed_signer_id() {
        let signer = WalletSigner::new(
            CredentialKind::Siws,
            "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
            Arc::new(MockWallet::new()),
        )
        .unwrap();
        let signature = signer.sign_hash(Felt::ONE).await.unwrap();
        assert_eq!(signature[0], SignerTypeTag::Siws.felt());
        assert_eq!(signature[1], signer.public_key());
    }

    #[tokio::test]
    async fn test_rejection_is_cancellation() {
        let signer = WalletSigner::new(
            CredentialKind::Eip191,
            "0x1",
            Arc::new(MockWallet::rejecting()),
        )
        .unwrap();
        let err = signer.sign_hash(Felt::ONE).await.unwrap_err();
        assert_eq!(err, SignerError::UserCancelled);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_non_wallet_kind_rejected() {
        assert!(WalletSigner::new(CredentialKind::Password, "0x1", Arc::new(MockWallet::new()))
            .is_err());
    }
}
