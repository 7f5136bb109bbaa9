use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use keychain_types::{CredentialKind, Felt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::authenticator::{Assertion, AssertionRequest, Authenticator, ASSERTION_TIMEOUT};
use crate::encoding::format_assertion;
use crate::error::SignerError;
use crate::signer::CredentialSigner;

/// Passkey-backed signer
pub struct WebauthnSigner {
    authenticator: Arc<dyn Authenticator>,
    credential_id: String,
    rp_id: String,
    public_key_sec1: Vec<u8>,
    class_hash: Felt,
    timeout: Duration,
}

impl WebauthnSigner {
    /// `public_key` is the base64url SEC1 point stored with the credential
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        credential_id: impl Into<String>,
        public_key: &str,
        rp_id: impl Into<String>,
        class_hash: Felt,
    ) -> Result<Self, SignerError> {
        let trimmed = public_key.trim_end_matches('=');
        let public_key_sec1 = URL_SAFE_NO_PAD
            .decode(trimmed)
            .or_else(|_| URL_SAFE.decode(public_key))
            .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
        if public_key_sec1.is_empty() {
            return Err(SignerError::InvalidPublicKey("empty public key".to_string()));
        }

        Ok(Self {
            authenticator,
            credential_id: credential_id.into(),
            rp_id: rp_id.into(),
            public_key_sec1,
            class_hash,
            timeout: ASSERTION_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn public_key_sec1(&self) -> &[u8] {
        &self.public_key_sec1
    }

    /// Run one assertion ceremony over `challenge`
    pub async fn sign(&self, challenge: &[u8]) -> Result<Assertion, SignerError> {
        if !self.authenticator.is_supported() {
            return Err(SignerError::WebauthnUnsupported);
        }

        let mut request =
            AssertionRequest::new(challenge.to_vec(), self.rp_id.clone(), self.credential_id.clone());
        request.timeout = self.timeout;

        debug!(rp_id = %self.rp_id, credential_id = %self.credential_id, "requesting assertion");
        match tokio::time::timeout(self.timeout, self.authenticator.get_assertion(&request)).await {
            Ok(Ok(assertion)) => Ok(assertion),
            Ok(Err(e)) => {
                warn!(error = %e, "assertion failed");
                Err(e)
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "assertion timed out");
                Err(SignerError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl CredentialSigner for WebauthnSigner {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Webauthn
    }

    /// Felt-sized identifier of the P-256 key
    fn public_key(&self) -> Felt {
        let digest: [u8; 32] = Sha256::digest(&self.public_key_sec1).into();
        Felt::from_bytes_be(digest).mask_bits(250)
    }

    async fn sign_hash(&self, hash: Felt) -> Result<Vec<Felt>, SignerError> {
        let assertion = self.sign(&hash.to_bytes_be()).await?;
        format_assertion(self.class_hash, &assertion)
    }
}
