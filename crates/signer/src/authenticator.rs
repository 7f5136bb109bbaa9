use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::SignerError;

/// Authenticator ceremony timeout
pub const ASSERTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Authenticator-data flag bits
pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;

/// Parameters of one `get` ceremony
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionRequest {
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub credential_id: String,
    pub user_verification_required: bool,
    pub timeout: Duration,
}

impl AssertionRequest {
    pub fn new(challenge: Vec<u8>, rp_id: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self {
            challenge,
            rp_id: rp_id.into(),
            credential_id: credential_id.into(),
            user_verification_required: true,
            timeout: ASSERTION_TIMEOUT,
        }
    }
}

/// Raw authenticator response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub credential_id: String,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    /// ASN.1 DER encoded ECDSA signature
    pub signature: Vec<u8>,
}

/// `clientDataJSON` fields the verifier cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default)]
    pub cross_origin: bool,
}

/// Platform WebAuthn API
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Capability gate checked before any ceremony
    fn is_supported(&self) -> bool;

    async fn get_assertion(&self, request: &AssertionRequest) -> Result<Assertion, SignerError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// MOCK AUTHENTICATOR
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Sign,
    Cancel,
    /// Never answers; exercises the ceremony timeout
    Hang,
}

/// Software P-256 authenticator producing real, verifiable assertions
#[derive(Clone)]
pub struct MockAuthenticator {
    signing_key: SigningKey,
    supported: bool,
    behavior: Arc<Mutex<MockBehavior>>,
    counter: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<AssertionRequest>>>,
}

impl MockAuthenticator {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            supported: true,
            behavior: Arc::new(Mutex::new(MockBehavior::Sign)),
            counter: Arc::new(AtomicU32::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Deterministic key derived from `seed`
    pub fn from_seed(seed: u8) -> Result<Self, SignerError> {
        let mut bytes: [u8; 32] = Sha256::digest([seed]).into();
        bytes[0] &= 0x7f;
        let key = SigningKey::from_bytes(&bytes.into())
            .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().await = behavior;
    }

    pub async fn requests(&self) -> Vec<AssertionRequest> {
        self.requests.lock().await.clone()
    }

    /// Uncompressed SEC1 public key
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Public key as stored in a webauthn credential
    pub fn public_key_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public_key_sec1())
    }

    fn authenticator_data(&self, rp_id: &str) -> Vec<u8> {
        let mut data: Vec<u8> = Sha256::digest(rp_id.as_bytes()).to_vec();
        data.push(FLAG_USER_PRESENT | FLAG_USER_VERIFIED);
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        data.extend(count.to_be_bytes());
        data
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn get_assertion(&self, request: &AssertionRequest) -> Result<Assertion, SignerError> {
        self.requests.lock().await.push(request.clone());

        match *self.behavior.lock().await {
            MockBehavior::Sign => {}
            MockBehavior::Cancel => return Err(SignerError::UserCancelled),
            MockBehavior::Hang => std::future::pending::<()>().await,
        }

        let client_data = ClientData {
            kind: "webauthn.get".to_string(),
            challenge: URL_SAFE_NO_PAD.encode(&request.challenge),
            origin: format!("https://{}", request.rp_id),
            cross_origin: false,
        };
        let client_data_json = serde_json::to_vec(&client_data)
            .map_err(|e| SignerError::Authenticator(e.to_string()))?;
        let authenticator_data = self.authenticator_data(&request.rp_id);

        let mut message = authenticator_data.clone();
        message.extend(Sha256::digest(&client_data_json));
        let signature: Signature = self.signing_key.sign(&message);

        Ok(Assertion {
            credential_id: request.credential_id.clone(),
            authenticator_data,
            client_data_json,
            signature: signature.to_der().as_bytes().to_vec(),
        })
    }
}
