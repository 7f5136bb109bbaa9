use async_trait::async_trait;
use keychain_types::{
    Credential, CredentialKind, Felt, InvocationDetails, InvokeTransaction, NormalizedCall,
    OutsideExecution,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::authenticator::{Authenticator, ASSERTION_TIMEOUT};
use crate::error::SignerError;
use crate::hasher::ChainHasher;
use crate::key::{KeySigner, StarkCurve, PASSWORD_KDF_ROUNDS};
use crate::wallet::{ExternalWallet, WalletSigner};
use crate::webauthn::WebauthnSigner;

/// Signs hashes on behalf of an account credential
#[async_trait]
pub trait CredentialSigner: Send + Sync {
    fn kind(&self) -> CredentialKind;

    /// Felt identifying the signing key on chain
    fn public_key(&self) -> Felt;

    /// Produce the account-contract signature array for `hash`
    async fn sign_hash(&self, hash: Felt) -> Result<Vec<Felt>, SignerError>;

    /// Build and sign an `__execute__` invocation
    async fn sign_transaction(
        &self,
        hasher: &dyn ChainHasher,
        address: Felt,
        calls: &[NormalizedCall],
        details: &InvocationDetails,
    ) -> Result<InvokeTransaction, SignerError> {
        let transaction = InvokeTransaction::new(address, calls, details);
        let hash = hasher.invoke_hash(&transaction)?;
        let signature = self.sign_hash(hash).await?;
        Ok(transaction.with_signature(signature))
    }

    async fn sign_outside_execution(
        &self,
        hasher: &dyn ChainHasher,
        outside_execution: &OutsideExecution,
        address: Felt,
        chain_id: &str,
    ) -> Result<Vec<Felt>, SignerError> {
        let hash = hasher.outside_execution_hash(outside_execution, address, chain_id)?;
        self.sign_hash(hash).await
    }

    async fn sign_typed_data(
        &self,
        hasher: &dyn ChainHasher,
        typed_data: &Value,
        address: Felt,
    ) -> Result<Vec<Felt>, SignerError> {
        let hash = hasher.typed_data_hash(typed_data, address)?;
        self.sign_hash(hash).await
    }
}

/// Platform collaborators available to signers
#[derive(Clone)]
pub struct SignerContext {
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub wallet: Option<Arc<dyn ExternalWallet>>,
    pub curve: Arc<dyn StarkCurve>,
    /// Class hash of the on-chain WebAuthn verifier
    pub webauthn_class_hash: Felt,
    pub webauthn_timeout: Duration,
    pub password_rounds: u32,
}

impl SignerContext {
    pub fn new(curve: Arc<dyn StarkCurve>) -> Self {
        Self {
            authenticator: None,
            wallet: None,
            curve,
            webauthn_class_hash: Felt::ZERO,
            webauthn_timeout: ASSERTION_TIMEOUT,
            password_rounds: PASSWORD_KDF_ROUNDS,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn ExternalWallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_webauthn_class_hash(mut self, class_hash: Felt) -> Self {
        self.webauthn_class_hash = class_hash;
        self
    }

    pub fn with_webauthn_timeout(mut self, timeout: Duration) -> Self {
        self.webauthn_timeout = timeout;
        self
    }

    pub fn with_password_rounds(mut self, rounds: u32) -> Self {
        self.password_rounds = rounds;
        self
    }
}

/// Pick the signer implementation for a credential
pub fn build_signer(
    credential: &Credential,
    context: &SignerContext,
    password: Option<&str>,
) -> Result<Arc<dyn CredentialSigner>, SignerError> {
    let signer: Arc<dyn CredentialSigner> = match credential {
        Credential::Webauthn {
            credential_id,
            public_key,
            rp_id,
        } => {
            let authenticator = context
                .authenticator
                .clone()
                .ok_or(SignerError::WebauthnUnsupported)?;
            Arc::new(WebauthnSigner::new(
                authenticator,
                credential_id.clone(),
                public_key,
                rp_id.clone(),
                context.webauthn_class_hash,
            )?
            .with_timeout(context.webauthn_timeout))
        }
        Credential::Eip191 { address } | Credential::Siws { address } => {
            let wallet = context
                .wallet
                .clone()
                .ok_or_else(|| SignerError::Wallet("no external wallet connected".to_string()))?;
            Arc::new(WalletSigner::new(credential.kind(), address.clone(), wallet)?)
        }
        Credential::Password { public_key, salt } => {
            let password = password.ok_or(SignerError::PasswordRequired)?;
            Arc::new(KeySigner::from_password(
                password,
                salt,
                *public_key,
                context.password_rounds,
                context.curve.clone(),
            )?)
        }
        Credential::Starknet { private_key } => {
            Arc::new(KeySigner::new(*private_key, context.curve.clone())?)
        }
    };
    Ok(signer)
}
