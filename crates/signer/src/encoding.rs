//! WebAuthn assertion → on-chain signature array.
//!
//! Layout:
//!
//! ```text
//! [class_hash, type_tag,
//!  r.x, r.y, r.z, s.x, s.y, s.z,
//!  flags,
//!  cd_word_count, cd_remainder, cd_words...,
//!  ad_word_count, ad_remainder, ad_words...]
//! ```
//!
//! `r` and `s` are split into three limbs of 86, 86 and 84 bits, lowest
//! first. Client data JSON and authenticator data are packed into big-endian
//! u32 words; the last word is right-padded with zeros and `remainder` is
//! `len % 4` so the verifier can recover the exact byte length.

use keychain_types::Felt;
use p256::ecdsa::Signature;

use crate::authenticator::Assertion;
use crate::error::SignerError;

/// Limb widths in bits, lowest limb first
pub const LIMB_BITS: [u32; 3] = [86, 86, 84];

/// Offset of the flags byte in authenticator data (after the rpId hash)
pub const FLAGS_OFFSET: usize = 32;

/// Minimum authenticator data length: rpId hash, flags, sign counter
pub const MIN_AUTH_DATA_LEN: usize = 37;

/// Signer discriminant understood by the account contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SignerTypeTag {
    Webauthn = 0,
    Starknet = 1,
    Eip191 = 2,
    Siws = 3,
}

impl SignerTypeTag {
    pub fn felt(self) -> Felt {
        Felt::from_u64(self as u64)
    }
}

/// Extract raw 32-byte `r` and `s` from an ASN.1 DER ECDSA signature.
/// Leading sign-padding zeros are handled by the DER parser.
pub fn parse_der_signature(der: &[u8]) -> Result<([u8; 32], [u8; 32]), SignerError> {
    let signature =
        Signature::from_der(der).map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    let bytes = signature.to_bytes();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Ok((r, s))
}

fn bit(value: &[u8; 32], index: u32) -> bool {
    let byte = value[31 - (index / 8) as usize];
    (byte >> (index % 8)) & 1 == 1
}

/// Split a big-endian 256-bit integer into `[x, y, z]` limbs
pub fn split_u256(value: &[u8; 32]) -> [Felt; 3] {
    let mut limbs = [Felt::ZERO; 3];
    let mut offset = 0;
    for (limb, width) in limbs.iter_mut().zip(LIMB_BITS) {
        let mut acc: u128 = 0;
        for i in (0..width).rev() {
            acc = (acc << 1) | bit(value, offset + i) as u128;
        }
        *limb = Felt::from_u128(acc);
        offset += width;
    }
    limbs
}

/// Inverse of [`split_u256`]; rejects limbs wider than their slot
pub fn join_u256(limbs: &[Felt; 3]) -> Result<[u8; 32], SignerError> {
    let mut out = [0u8; 32];
    let mut offset = 0;
    for (limb, width) in limbs.iter().zip(LIMB_BITS) {
        let value = limb
            .to_u128()
            .filter(|v| *v >> width == 0)
            .ok_or_else(|| {
                SignerError::MalformedAssertion(format!("limb {limb} exceeds {width} bits"))
            })?;
        for i in 0..width {
            if (value >> i) & 1 == 1 {
                let index = offset + i;
                out[31 - (index / 8) as usize] |= 1 << (index % 8);
            }
        }
        offset += width;
    }
    Ok(out)
}

/// Pack bytes into big-endian u32 words; returns `(words, len % 4)`
pub fn pack_words(bytes: &[u8]) -> (Vec<u32>, u8) {
    let words = bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_be_bytes(word)
        })
        .collect();
    (words, (bytes.len() % 4) as u8)
}

/// Inverse of [`pack_words`]
pub fn unpack_words(words: &[u32], remainder: u8) -> Result<Vec<u8>, SignerError> {
    if remainder > 3 || (words.is_empty() && remainder != 0) {
        return Err(SignerError::MalformedAssertion(format!(
            "invalid remainder {remainder} for {} words",
            words.len()
        )));
    }
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    if remainder != 0 {
        bytes.truncate((words.len() - 1) * 4 + remainder as usize);
    }
    Ok(bytes)
}

fn push_buffer(out: &mut Vec<Felt>, bytes: &[u8]) {
    let (words, remainder) = pack_words(bytes);
    out.push(Felt::from_u64(words.len() as u64));
    out.push(Felt::from_u64(remainder as u64));
    out.extend(words.into_iter().map(|w| Felt::from_u64(w as u64)));
}

/// Encode an assertion for the account contract's WebAuthn verifier
pub fn format_assertion(class_hash: Felt, assertion: &Assertion) -> Result<Vec<Felt>, SignerError> {
    if assertion.authenticator_data.len() < MIN_AUTH_DATA_LEN {
        return Err(SignerError::MalformedAssertion(format!(
            "authenticator data is {} bytes, expected at least {MIN_AUTH_DATA_LEN}",
            assertion.authenticator_data.len()
        )));
    }

    let (r, s) = parse_der_signature(&assertion.signature)?;
    let flags = assertion.authenticator_data[FLAGS_OFFSET];

    let mut out = Vec::with_capacity(
        11 + assertion.client_data_json.len() / 4 + assertion.authenticator_data.len() / 4 + 2,
    );
    out.push(class_hash);
    out.push(SignerTypeTag::Webauthn.felt());
    out.extend(split_u256(&r));
    out.extend(split_u256(&s));
    out.push(Felt::from_u64(flags as u64));
    push_buffer(&mut out, &assertion.client_data_json);
    push_buffer(&mut out, &assertion.authenticator_data);
    Ok(out)
}
