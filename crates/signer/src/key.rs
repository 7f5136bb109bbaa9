use async_trait::async_trait;
use hmac::Hmac;
use keychain_types::{CredentialKind, Felt};
use pbkdf2::pbkdf2;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::SignerError;
use crate::signer::CredentialSigner;

pub const PASSWORD_KDF_ROUNDS: u32 = 100_000;

/// Stark-curve ECDSA, injected like [`crate::ChainHasher`]
pub trait StarkCurve: Send + Sync {
    fn public_key(&self, private_key: &Felt) -> Result<Felt, SignerError>;

    fn sign(&self, private_key: &Felt, hash: &Felt) -> Result<(Felt, Felt), SignerError>;

    fn verify(&self, public_key: &Felt, hash: &Felt, r: &Felt, s: &Felt) -> Result<bool, SignerError>;
}

/// Derive a Stark private key from a password. The PBKDF2 output is masked
/// to 251 bits so it is always below the field modulus.
pub fn derive_password_key(password: &str, salt: &str, rounds: u32) -> Felt {
    let mut key = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt.as_bytes(), rounds, &mut key);
    Felt::from_bytes_be(key).mask_bits(251)
}

/// Signs with a raw Stark key (starknet and password credentials)
pub struct KeySigner {
    private_key: Felt,
    public_key: Felt,
    kind: CredentialKind,
    curve: Arc<dyn StarkCurve>,
}

impl KeySigner {
    pub fn new(private_key: Felt, curve: Arc<dyn StarkCurve>) -> Result<Self, SignerError> {
        let public_key = curve.public_key(&private_key)?;
        Ok(Self {
            private_key,
            public_key,
            kind: CredentialKind::Starknet,
            curve,
        })
    }

    /// Derive from a password and check it against the stored public key
    pub fn from_password(
        password: &str,
        salt: &str,
        expected_public_key: Felt,
        rounds: u32,
        curve: Arc<dyn StarkCurve>,
    ) -> Result<Self, SignerError> {
        let private_key = derive_password_key(password, salt, rounds);
        let mut signer = Self::new(private_key, curve)?;
        if signer.public_key != expected_public_key {
            return Err(SignerError::WrongPassword);
        }
        signer.kind = CredentialKind::Password;
        Ok(signer)
    }
}

impl std::fmt::Debug for KeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySigner")
            .field("public_key", &self.public_key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialSigner for KeySigner {
    fn kind(&self) -> CredentialKind {
        self.kind
    }

    fn public_key(&self) -> Felt {
        self.public_key
    }

    async fn sign_hash(&self, hash: Felt) -> Result<Vec<Felt>, SignerError> {
        let (r, s) = self.curve.sign(&self.private_key, &hash)?;
        Ok(vec![r, s])
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK CURVE
// ═══════════════════════════════════════════════════════════════════════════

/// Hash-based stand-in for the Stark curve. Signatures verify against the
/// public key, which is all the controller relies on.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCurve;

impl MockCurve {
    fn h(domain: &[u8], parts: &[&Felt]) -> Felt {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        for part in parts {
            hasher.update(part.as_bytes());
        }
        let bytes: [u8; 32] = hasher.finalize().into();
        Felt::from_bytes_be(bytes).mask_bits(251)
    }
}

impl StarkCurve for MockCurve {
    fn public_key(&self, private_key: &Felt) -> Result<Felt, SignerError> {
        if private_key.is_zero() {
            return Err(SignerError::InvalidPublicKey("zero private key".to_string()));
        }
        Ok(Self::h(b"pk", &[private_key]))
    }

    fn sign(&self, private_key: &Felt, hash: &Felt) -> Result<(Felt, Felt), SignerError> {
        let public_key = self.public_key(private_key)?;
        let r = Self::h(b"r", &[private_key, hash]);
        let s = Self::h(b"s", &[&public_key, hash, &r]);
        Ok((r, s))
    }

    fn verify(&self, public_key: &Felt, hash: &Felt, r: &Felt, s: &Felt) -> Result<bool, SignerError> {
        Ok(Self::h(b"s", &[public_key, hash, r]) == *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_signer_signatures_verify() {
        let curve = Arc::new(MockCurve);
        let signer = KeySigner::new(Felt::from_u64(0x5eed), curve.clone()).unwrap();
        let hash = Felt::from_u64(0x1234);

        let signature = signer.sign_hash(hash).await.unwrap();
        assert_eq!(signature.len(), 2);
        assert!(curve
            .verify(&signer.public_key(), &hash, &signature[0], &signature[1])
            .unwrap());
        assert!(!curve
            .verify(&signer.public_key(), &Felt::ONE, &signature[0], &signature[1])
            .unwrap());
    }

    #[test]
    fn test_password_derivation_is_deterministic_and_masked() {
        let a = derive_password_key("hunter2", "salt", 10);
        let b = derive_password_key("hunter2", "salt", 10);
        let c = derive_password_key("hunter3", "salt", 10);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_bytes()[0] & 0xf8, 0);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let curve: Arc<dyn StarkCurve> = Arc::new(MockCurve);
        let private_key = derive_password_key("correct", "salt", 10);
        let public_key = curve.public_key(&private_key).unwrap();

        let signer =
            KeySigner::from_password("correct", "salt", public_key, 10, curve.clone()).unwrap();
        assert_eq!(signer.kind(), CredentialKind::Password);

        let err = KeySigner::from_password("wrong", "salt", public_key, 10, curve).unwrap_err();
        assert_eq!(err, SignerError::WrongPassword);
    }
}
