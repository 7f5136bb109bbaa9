//! SNIP-12 typed data hashing.
//!
//! Revision 0 (`StarkNetDomain`, Pedersen) and revision 1 (`StarknetDomain`,
//! Poseidon) are both supported. Enums and merkle trees are rejected.

use std::collections::{BTreeSet, HashMap};

use keychain_types::{get_selector_from_name, starknet_keccak, Felt};
use serde::Deserialize;
use serde_json::Value;
use starknet_crypto::Felt as FieldElement;

use crate::error::SignerError;
use crate::stark::{from_field, pedersen_on_elements, poseidon_on_elements, to_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    V0,
    V1,
}

impl Revision {
    fn domain_type(self) -> &'static str {
        match self {
            Revision::V0 => "StarkNetDomain",
            Revision::V1 => "StarknetDomain",
        }
    }

    fn hash(self, elements: &[FieldElement]) -> FieldElement {
        match self {
            Revision::V0 => pedersen_on_elements(elements),
            Revision::V1 => poseidon_on_elements(elements),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Member {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    types: HashMap<String, Vec<Member>>,
    primary_type: String,
    domain: Value,
    message: Value,
}

fn invalid(message: impl Into<String>) -> SignerError {
    SignerError::InvalidTypedData(message.into())
}

/// Types defined by revision 1 without being declared in `types`
fn preset(name: &str) -> Option<Vec<Member>> {
    let member = |name: &str, kind: &str| Member {
        name: name.to_string(),
        kind: kind.to_string(),
    };
    match name {
        "u256" => Some(vec![member("low", "u128"), member("high", "u128")]),
        _ => None,
    }
}

struct Encoder {
    types: HashMap<String, Vec<Member>>,
    revision: Revision,
}

impl Encoder {
    fn members(&self, name: &str) -> Option<Vec<Member>> {
        self.types.get(name).cloned().or_else(|| match self.revision {
            Revision::V1 => preset(name),
            Revision::V0 => None,
        })
    }

    fn is_struct(&self, kind: &str) -> bool {
        self.members(kind).is_some()
    }

    fn collect_dependencies(&self, name: &str, seen: &mut BTreeSet<String>) {
        let Some(members) = self.members(name) else {
            return;
        };
        for member in members {
            let kind = member.kind.trim_end_matches('*');
            if self.is_struct(kind) && seen.insert(kind.to_string()) {
                self.collect_dependencies(kind, seen);
            }
        }
    }

    fn encode_type(&self, name: &str) -> Result<String, SignerError> {
        let mut dependencies = BTreeSet::new();
        self.collect_dependencies(name, &mut dependencies);
        dependencies.remove(name);

        let mut encoded = String::new();
        for kind in std::iter::once(name.to_string()).chain(dependencies) {
            let members = self
                .members(&kind)
                .ok_or_else(|| invalid(format!("unknown type `{kind}`")))?;
            let fields: Vec<String> = members
                .iter()
                .map(|member| match self.revision {
                    Revision::V0 => format!("{}:{}", member.name, member.kind),
                    Revision::V1 => format!("\"{}\":\"{}\"", member.name, member.kind),
                })
                .collect();
            match self.revision {
                Revision::V0 => encoded.push_str(&format!("{kind}({})", fields.join(","))),
                Revision::V1 => encoded.push_str(&format!("\"{kind}\"({})", fields.join(","))),
            }
        }
        Ok(encoded)
    }

    fn type_hash(&self, name: &str) -> Result<FieldElement, SignerError> {
        Ok(to_field(&starknet_keccak(self.encode_type(name)?.as_bytes())))
    }

    fn struct_hash(&self, name: &str, data: &Value) -> Result<FieldElement, SignerError> {
        let members = self
            .members(name)
            .ok_or_else(|| invalid(format!("unknown type `{name}`")))?;
        let mut elements = vec![self.type_hash(name)?];
        for member in &members {
            let value = data
                .get(&member.name)
                .ok_or_else(|| invalid(format!("`{name}` is missing `{}`", member.name)))?;
            elements.push(self.encode_value(&member.kind, value)?);
        }
        Ok(self.revision.hash(&elements))
    }

    fn encode_value(&self, kind: &str, value: &Value) -> Result<FieldElement, SignerError> {
        if let Some(inner) = kind.strip_suffix('*') {
            let items = value
                .as_array()
                .ok_or_else(|| invalid(format!("`{kind}` expects an array")))?;
            let encoded = items
                .iter()
                .map(|item| self.encode_value(inner, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(self.revision.hash(&encoded));
        }
        if self.is_struct(kind) {
            return self.struct_hash(kind, value);
        }

        match kind {
            "felt" | "shortstring" | "ContractAddress" | "ClassHash" | "u128" | "i128"
            | "timestamp" => parse_scalar(value),
            "bool" => match value {
                Value::Bool(flag) => Ok(FieldElement::from(u64::from(*flag))),
                other => parse_scalar(other),
            },
            "selector" => {
                let name = value
                    .as_str()
                    .ok_or_else(|| invalid("selector expects a string"))?;
                if name.starts_with("0x") {
                    parse_scalar(value)
                } else {
                    Ok(to_field(&get_selector_from_name(name)))
                }
            }
            "string" => match self.revision {
                Revision::V0 => parse_scalar(value),
                Revision::V1 => {
                    let text = value
                        .as_str()
                        .ok_or_else(|| invalid("string expects a string"))?;
                    Ok(poseidon_on_elements(&byte_array(text)))
                }
            },
            "enum" | "merkletree" => Err(invalid(format!("`{kind}` is not supported"))),
            other => Err(invalid(format!("unknown type `{other}`"))),
        }
    }
}

/// Numbers, hex, decimal strings, otherwise a Cairo short string
fn parse_scalar(value: &Value) -> Result<FieldElement, SignerError> {
    let felt = match value {
        Value::Number(number) => number
            .as_u64()
            .map(Felt::from_u64)
            .ok_or_else(|| invalid(format!("unsupported number {number}")))?,
        Value::Bool(flag) => Felt::from_u64(u64::from(*flag)),
        Value::String(text) if text.starts_with("0x") || text.starts_with("0X") => {
            Felt::from_hex(text).map_err(|e| invalid(e.to_string()))?
        }
        Value::String(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
            Felt::from_dec_str(text).map_err(|e| invalid(e.to_string()))?
        }
        Value::String(text) => Felt::from_short_string(text).map_err(|e| invalid(e.to_string()))?,
        other => return Err(invalid(format!("unsupported value {other}"))),
    };
    Ok(to_field(&felt))
}

/// Serialized Cairo `ByteArray`: full 31-byte words, then the pending word
fn byte_array(text: &str) -> Vec<FieldElement> {
    let bytes = text.as_bytes();
    let (full, pending) = bytes.split_at(bytes.len() - bytes.len() % 31);

    let word = |chunk: &[u8]| {
        let mut padded = [0u8; 32];
        padded[32 - chunk.len()..].copy_from_slice(chunk);
        FieldElement::from_bytes_be(&padded)
    };

    let mut elements = vec![FieldElement::from((full.len() / 31) as u64)];
    elements.extend(full.chunks(31).map(word));
    elements.push(word(pending));
    elements.push(FieldElement::from(pending.len() as u64));
    elements
}

fn revision_of(domain: &Value) -> Revision {
    match domain.get("revision") {
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Revision::V1,
        Some(Value::String(s)) if s == "1" => Revision::V1,
        _ => Revision::V0,
    }
}

/// Message hash of `typed_data` as signed by `account`
pub fn typed_data_hash(typed_data: &Value, account: Felt) -> Result<Felt, SignerError> {
    for field in ["types", "primaryType", "domain", "message"] {
        if typed_data.get(field).is_none() {
            return Err(invalid(format!("missing `{field}`")));
        }
    }
    let envelope: Envelope =
        serde_json::from_value(typed_data.clone()).map_err(|e| invalid(e.to_string()))?;
    let revision = revision_of(&envelope.domain);
    let encoder = Encoder {
        types: envelope.types,
        revision,
    };

    let domain_hash = encoder.struct_hash(revision.domain_type(), &envelope.domain)?;
    let message_hash = encoder.struct_hash(&envelope.primary_type, &envelope.message)?;
    let prefix = Felt::from_short_string("StarkNet Message").map_err(|e| invalid(e.to_string()))?;

    Ok(from_field(&revision.hash(&[
        to_field(&prefix),
        domain_hash,
        to_field(&account),
        message_hash,
    ])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn felt(hex: &str) -> Felt {
        Felt::from_hex(hex).unwrap()
    }

    fn mail() -> Value {
        json!({
            "types": {
                "StarkNetDomain": [
                    { "name": "name", "type": "felt" },
                    { "name": "version", "type": "felt" },
                    { "name": "chainId", "type": "felt" }
                ],
                "Person": [
                    { "name": "name", "type": "felt" },
                    { "name": "wallet", "type": "felt" }
                ],
                "Mail": [
                    { "name": "from", "type": "Person" },
                    { "name": "to", "type": "Person" },
                    { "name": "contents", "type": "felt" }
                ]
            },
            "primaryType": "Mail",
            "domain": { "name": "StarkNet Mail", "version": "1", "chainId": 1 },
            "message": {
                "from": { "name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826" },
                "to": { "name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB" },
                "contents": "Hello, Bob!"
            }
        })
    }

    #[test]
    fn test_revision_0_type_encoding() {
        let typed_data: Envelope = serde_json::from_value(mail()).unwrap();
        let encoder = Encoder {
            types: typed_data.types,
            revision: Revision::V0,
        };
        assert_eq!(
            encoder.encode_type("Mail").unwrap(),
            "Mail(from:Person,to:Person,contents:felt)Person(name:felt,wallet:felt)"
        );
        assert_eq!(
            from_field(&encoder.type_hash("StarkNetDomain").unwrap()),
            felt("0x1bfc207425a47a5dfa1a50a4f5241203f50624ca5fdf5e18755765416b8e288")
        );
    }

    #[test]
    fn test_revision_0_message_hash() {
        let hash = typed_data_hash(&mail(), felt("0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826"));
        assert_eq!(
            hash.unwrap(),
            felt("0x6fcff244f63e38b9d88b9e3378d44757710d1b244282b435cb472053c8d78d0")
        );
    }

    #[test]
    fn test_revision_1_domain_type_hash() {
        let types = serde_json::from_value(json!({
            "StarknetDomain": [
                { "name": "name", "type": "shortstring" },
                { "name": "version", "type": "shortstring" },
                { "name": "chainId", "type": "shortstring" },
                { "name": "revision", "type": "shortstring" }
            ]
        }))
        .unwrap();
        let encoder = Encoder {
            types,
            revision: Revision::V1,
        };
        let hash = encoder.type_hash("StarknetDomain").unwrap();
        assert_eq!(
            from_field(&hash),
            felt("0x1ff2f602e42168014d405a94f75e8a93d640751d71d16311266e140d8b0a210")
        );
    }

    #[test]
    fn test_byte_array_layout() {
        let short = byte_array("hi");
        assert_eq!(short.len(), 3);
        assert_eq!(short[0], FieldElement::ZERO);
        assert_eq!(short[2], FieldElement::from(2u64));

        let exact = byte_array(&"a".repeat(31));
        assert_eq!(exact[0], FieldElement::ONE);
        assert_eq!(exact[3], FieldElement::ZERO);
    }

    #[test]
    fn test_unsupported_and_incomplete_data_rejected() {
        let mut typed_data = mail();
        typed_data["message"]
            .as_object_mut()
            .unwrap()
            .remove("contents");
        assert!(matches!(
            typed_data_hash(&typed_data, Felt::ONE),
            Err(SignerError::InvalidTypedData(_))
        ));

        assert!(matches!(
            typed_data_hash(&json!({ "message": {} }), Felt::ONE),
            Err(SignerError::InvalidTypedData(_))
        ));
    }
}
