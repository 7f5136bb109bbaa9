use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeltError {
    #[error("invalid hex value: {0}")]
    InvalidHex(String),

    #[error("invalid decimal value: {0}")]
    InvalidDecimal(String),

    #[error("value does not fit in 32 bytes: {0}")]
    Overflow(String),
}

/// A 32-byte big-endian field element.
///
/// Serialized as a `0x`-prefixed hex string without leading zeros. Parsing
/// accepts both hex (`0x…`) and decimal strings, mirroring what embedding
/// apps put into calldata.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Felt([u8; 32]);

impl Felt {
    pub const ZERO: Felt = Felt([0u8; 32]);
    pub const ONE: Felt = Felt::from_u64(1);

    pub const fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        let be = value.to_be_bytes();
        let mut i = 0;
        while i < 8 {
            bytes[24 + i] = be[i];
            i += 1;
        }
        Felt(bytes)
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Felt(bytes)
    }

    pub const fn from_bytes_be(bytes: [u8; 32]) -> Self {
        Felt(bytes)
    }

    /// Build from up to 32 big-endian bytes, left-padding with zeros.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, FeltError> {
        if bytes.len() > 32 {
            return Err(FeltError::Overflow(hex::encode(bytes)));
        }
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(bytes);
        Ok(Felt(out))
    }

    pub fn to_bytes_be(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn from_hex(value: &str) -> Result<Self, FeltError> {
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .ok_or_else(|| FeltError::InvalidHex(value.to_string()))?;

        if digits.is_empty() {
            return Err(FeltError::InvalidHex(value.to_string()));
        }

        let digits = digits.trim_start_matches('0');
        if digits.len() > 64 {
            return Err(FeltError::Overflow(value.to_string()));
        }

        let padded = format!("{:0>64}", digits);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|_| FeltError::InvalidHex(value.to_string()))?;
        Ok(Felt(bytes))
    }

    pub fn from_dec_str(value: &str) -> Result<Self, FeltError> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FeltError::InvalidDecimal(value.to_string()));
        }

        let mut bytes = [0u8; 32];
        for digit in value.bytes().map(|b| (b - b'0') as u16) {
            let mut carry = digit;
            for byte in bytes.iter_mut().rev() {
                let v = (*byte as u16) * 10 + carry;
                *byte = (v & 0xff) as u8;
                carry = v >> 8;
            }
            if carry != 0 {
                return Err(FeltError::Overflow(value.to_string()));
            }
        }
        Ok(Felt(bytes))
    }

    /// Minimal hex form, `0x0` for zero
    pub fn to_hex(&self) -> String {
        let full = hex::encode(self.0);
        let trimmed = full.trim_start_matches('0');
        if trimmed.is_empty() {
            "0x0".to_string()
        } else {
            format!("0x{trimmed}")
        }
    }

    /// Canonical 64-digit hex form used for addresses and storage keys
    pub fn to_fixed_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut be = [0u8; 8];
        be.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(be))
    }

    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut be = [0u8; 16];
        be.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(be))
    }

    /// Clear every bit at or above `bits`.
    pub fn mask_bits(self, bits: u32) -> Self {
        let mut bytes = self.0;
        for (i, byte) in bytes.iter_mut().enumerate() {
            let bit_offset = ((31 - i) * 8) as u32;
            if bit_offset >= bits {
                *byte = 0;
            } else if bit_offset + 8 > bits {
                let keep = bits - bit_offset;
                *byte &= ((1u16 << keep) - 1) as u8;
            }
        }
        Felt(bytes)
    }

    /// Encode an ASCII string of at most 31 bytes as a short string felt
    pub fn from_short_string(value: &str) -> Result<Self, FeltError> {
        if value.len() > 31 || !value.is_ascii() {
            return Err(FeltError::Overflow(value.to_string()));
        }
        Self::from_be_slice(value.as_bytes())
    }
}

impl FromStr for Felt {
    type Err = FeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            Felt::from_hex(s)
        } else {
            Felt::from_dec_str(s)
        }
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Felt::from_u64(value)
    }
}

impl From<u128> for Felt {
    fn from(value: u128) -> Self {
        Felt::from_u128(value)
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Felt({})", self.to_hex())
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FeltVisitor;

        impl<'de> Visitor<'de> for FeltVisitor {
            type Value = Felt;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a hex or decimal string, or an unsigned integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Felt, E> {
                Felt::from_str(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Felt, E> {
                Ok(Felt::from_u64(v))
            }
        }

        deserializer.deserialize_any(FeltVisitor)
    }
}
