//! Reference decoder and verifier for encoded WebAuthn signatures.
//!
//! Mirrors what the account contract does on chain, so encoding changes can
//! be checked end to end without a node.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use keychain_types::Felt;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::authenticator::ClientData;
use crate::encoding::{join_u256, unpack_words, SignerTypeTag, FLAGS_OFFSET};
use crate::error::SignerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSignature {
    pub class_hash: Felt,
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub flags: u8,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
}

struct Reader<'a> {
    felts: &'a [Felt],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn next(&mut self, what: &str) -> Result<Felt, SignerError> {
        let felt = self.felts.get(self.pos).copied().ok_or_else(|| {
            SignerError::MalformedAssertion(format!("signature truncated before {what}"))
        })?;
        self.pos += 1;
        Ok(felt)
    }

    fn small(&mut self, what: &str) -> Result<u64, SignerError> {
        self.next(what)?
            .to_u64()
            .ok_or_else(|| SignerError::MalformedAssertion(format!("{what} out of range")))
    }

    fn buffer(&mut self, what: &str) -> Result<Vec<u8>, SignerError> {
        let count = self.small(what)? as usize;
        let remainder = self.small(what)?;
        if count > self.felts.len().saturating_sub(self.pos) {
            return Err(SignerError::MalformedAssertion(format!(
                "{what} claims {count} words"
            )));
        }
        let words = (0..count)
            .map(|_| {
                self.small(what).and_then(|w| {
                    u32::try_from(w).map_err(|_| {
                        SignerError::MalformedAssertion(format!("{what} word exceeds u32"))
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        unpack_words(&words, remainder as u8)
    }
}

/// Invert `format_assertion`
pub fn decode_signature(felts: &[Felt]) -> Result<DecodedSignature, SignerError> {
    let mut reader = Reader { felts, pos: 0 };

    let class_hash = reader.next("class hash")?;
    let tag = reader.next("type tag")?;
    if tag != SignerTypeTag::Webauthn.felt() {
        return Err(SignerError::MalformedAssertion(format!(
            "type tag {tag} is not webauthn"
        )));
    }

    let r = join_u256(&[reader.next("r.x")?, reader.next("r.y")?, reader.next("r.z")?])?;
    let s = join_u256(&[reader.next("s.x")?, reader.next("s.y")?, reader.next("s.z")?])?;
    let flags = u8::try_from(reader.small("flags")?)
        .map_err(|_| SignerError::MalformedAssertion("flags exceed a byte".to_string()))?;
    let client_data_json = reader.buffer("client data")?;
    let authenticator_data = reader.buffer("authenticator data")?;

    if reader.pos != felts.len() {
        return Err(SignerError::MalformedAssertion(format!(
            "{} trailing elements",
            felts.len() - reader.pos
        )));
    }

    Ok(DecodedSignature {
        class_hash,
        r,
        s,
        flags,
        client_data_json,
        authenticator_data,
    })
}

/// Check a decoded signature against the expected challenge and key
pub fn verify_assertion(
    public_key_sec1: &[u8],
    challenge: &[u8],
    decoded: &DecodedSignature,
) -> Result<(), SignerError> {
    let client_data: ClientData = serde_json::from_slice(&decoded.client_data_json)
        .map_err(|e| SignerError::MalformedAssertion(format!("client data: {e}")))?;

    if client_data.kind != "webauthn.get" {
        return Err(SignerError::VerificationFailed(format!(
            "unexpected client data type {}",
            client_data.kind
        )));
    }
    if client_data.challenge != URL_SAFE_NO_PAD.encode(challenge) {
        return Err(SignerError::VerificationFailed(
            "challenge mismatch".to_string(),
        ));
    }
    if decoded.authenticator_data.get(FLAGS_OFFSET) != Some(&decoded.flags) {
        return Err(SignerError::VerificationFailed(
            "flags do not match authenticator data".to_string(),
        ));
    }

    let verifying_key = VerifyingKey::from_sec1_bytes(public_key_sec1)
        .map_err(|e| SignerError::InvalidPublicKey(e.to_string()))?;

    let mut raw = [0u8; 64];
    raw[..32].copy_from_slice(&decoded.r);
    raw[32..].copy_from_slice(&decoded.s);
    let signature =
        Signature::from_slice(&raw).map_err(|e| SignerError::InvalidSignature(e.to_string()))?;

    let mut message = decoded.authenticator_data.clone();
    message.extend(Sha256::digest(&decoded.client_data_json));

    verifying_key
        .verify(&message, &signature)
        .map_err(|e| SignerError::VerificationFailed(e.to_string()))
}
