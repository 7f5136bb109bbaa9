use keychain_types::Felt;
use starknet_crypto::Felt as FieldElement;

use crate::error::SignerError;
use crate::key::StarkCurve;

/// Attempts at a fresh RFC 6979 nonce before giving up on a hash
const MAX_SIGN_ATTEMPTS: u64 = 8;

/// Values at or above the field modulus are reduced
pub(crate) fn to_field(felt: &Felt) -> FieldElement {
    FieldElement::from_bytes_be(felt.as_bytes())
}

pub(crate) fn from_field(element: &FieldElement) -> Felt {
    Felt::from_bytes_be(element.to_bytes_be())
}

/// Cairo 0 array hash: Pedersen fold from zero, then the length
pub(crate) fn pedersen_on_elements(elements: &[FieldElement]) -> FieldElement {
    let folded = elements
        .iter()
        .fold(FieldElement::ZERO, |acc, element| {
            starknet_crypto::pedersen_hash(&acc, element)
        });
    starknet_crypto::pedersen_hash(&folded, &FieldElement::from(elements.len() as u64))
}

pub(crate) fn poseidon_on_elements(elements: &[FieldElement]) -> FieldElement {
    starknet_crypto::poseidon_hash_many(elements)
}

/// Stark-curve ECDSA with RFC 6979 deterministic nonces
#[derive(Debug, Clone, Copy, Default)]
pub struct StarknetCurve;

impl StarkCurve for StarknetCurve {
    fn public_key(&self, private_key: &Felt) -> Result<Felt, SignerError> {
        if private_key.is_zero() {
            return Err(SignerError::InvalidPublicKey("zero private key".to_string()));
        }
        Ok(from_field(&starknet_crypto::get_public_key(&to_field(private_key))))
    }

    fn sign(&self, private_key: &Felt, hash: &Felt) -> Result<(Felt, Felt), SignerError> {
        let private_key = to_field(private_key);
        let hash = to_field(hash);

        let mut seed: Option<FieldElement> = None;
        let mut last_error = String::new();
        for attempt in 1..=MAX_SIGN_ATTEMPTS {
            let k = starknet_crypto::rfc6979_generate_k(&hash, &private_key, seed.as_ref());
            match starknet_crypto::sign(&private_key, &hash, &k) {
                Ok(signature) => return Ok((from_field(&signature.r), from_field(&signature.s))),
                Err(e) => {
                    last_error = format!("{e:?}");
                    seed = Some(FieldElement::from(attempt));
                }
            }
        }
        Err(SignerError::Signing(last_error))
    }

    fn verify(&self, public_key: &Felt, hash: &Felt, r: &Felt, s: &Felt) -> Result<bool, SignerError> {
        starknet_crypto::verify(&to_field(public_key), &to_field(hash), &to_field(r), &to_field(s))
            .map_err(|e| SignerError::InvalidPublicKey(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySigner;
    use crate::signer::CredentialSigner;
    use std::sync::Arc;

    fn felt(hex: &str) -> Felt {
        Felt::from_hex(hex).unwrap()
    }

    #[test]
    fn test_public_key_vector() {
        let private_key = felt("0x03c1e9550e66958296d11b60f8e8e7a7ad990d07fa65d5f7652c4a6c87d4e3cc");
        assert_eq!(
            StarknetCurve.public_key(&private_key).unwrap(),
            felt("0x077a3b314db07c45076d11f62b6f9e748a39790441823307743cf00d6597ea43")
        );
        assert!(StarknetCurve.public_key(&Felt::ZERO).is_err());
    }

    #[test]
    fn test_empty_array_hash() {
        assert_eq!(
            from_field(&pedersen_on_elements(&[])),
            felt("0x49ee3eba8c1600700ee1b87eb599f16716b0b1022947733551fde4050ca6804")
        );
    }

    #[tokio::test]
    async fn test_signatures_verify_and_are_deterministic() {
        let curve = Arc::new(StarknetCurve);
        let signer = KeySigner::new(Felt::from_u64(0x5eed), curve.clone()).unwrap();
        let hash = felt("0x6fcff244f63e38b9d88b9e3378d44757710d1b244282b435cb472053c8d78d0");

        let signature = signer.sign_hash(hash).await.unwrap();
        assert_eq!(signature, signer.sign_hash(hash).await.unwrap());
        assert!(curve
            .verify(&signer.public_key(), &hash, &signature[0], &signature[1])
            .unwrap());
        assert!(!curve
            .verify(&signer.public_key(), &Felt::ONE, &signature[0], &signature[1])
            .unwrap());
    }
}
