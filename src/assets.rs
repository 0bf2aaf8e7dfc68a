// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Asset classification.
//!
//! An asset is a 32-byte tag computed purely from payload bytes. Deriving
//! the tag from the payload (rather than from caller-declared types) means
//! a message class the classifier does not know about cannot be signed
//! under any existing lease: unknown payloads classify to the zero tag and
//! the signing gate rejects them, owner included. Extending the signable
//! surface requires extending the classifier.
//!
//! Recognized classes:
//!
//! - `0x19 0x01 ...`: raw EIP-712 envelopes classify to zero; typed data
//!   must flow through the typed-data path, where the tag is derived from
//!   the domain name.
//! - `0x19 0x45 ...`: the "Ethereum signed message" prefix.
//! - `0x02 ...`: an EIP-1559 transaction envelope. Any payload whose first
//!   byte is `0x02` classifies as a transaction; the ambiguity is accepted.
//! - anything else: the zero tag, rejected.

use alloy::primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Tag for payloads carrying the `0x19 0x45` signed-message prefix.
pub fn signed_message_asset() -> B256 {
    B256::from(U256::from(0x1945u64))
}

/// Tag for EIP-1559 transaction envelopes.
pub fn transaction_asset() -> B256 {
    B256::from(U256::from(0x02u64))
}

/// Tag for typed structured data under the given domain name:
/// `Keccak-256("EIP-712 " ∥ domainName)`.
pub fn typed_data_asset(domain_name: &str) -> B256 {
    let mut preimage = Vec::with_capacity(8 + domain_name.len());
    preimage.extend_from_slice(b"EIP-712 ");
    preimage.extend_from_slice(domain_name.as_bytes());
    keccak256(&preimage)
}

/// Tag for an Ethereum-transaction destination:
/// `Keccak-256(uint256(chainId) ∥ to)`.
pub fn destination_asset(chain_id: u64, to: Address) -> B256 {
    let mut preimage = [0u8; 52];
    preimage[..32].copy_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
    preimage[32..].copy_from_slice(to.as_slice());
    keccak256(preimage)
}

/// Classify a raw payload into its asset tag.
///
/// Pure over the first one or two bytes. Returns the zero tag for
/// everything unrecognized; the zero tag is never signable.
pub fn classify(payload: &[u8]) -> B256 {
    if payload.len() >= 2 && payload[0] == 0x19 && payload[1] == 0x01 {
        return B256::ZERO;
    }
    if payload.len() >= 2 && payload[0] == 0x19 && payload[1] == 0x45 {
        return signed_message_asset();
    }
    if !payload.is_empty() && payload[0] == 0x02 {
        return transaction_asset();
    }
    B256::ZERO
}

// =============================================================================
// EIP-712 domains
// =============================================================================

/// An EIP-712 domain with its parameter mask encoded by `Option` presence.
///
/// The `EIP712Domain` type string is reconstructed from exactly the present
/// parameters, in canonical subset order
/// {name, version, chainId, verifyingContract, salt}.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDomain {
    pub name: Option<String>,
    pub version: Option<String>,
    pub chain_id: Option<U256>,
    pub verifying_contract: Option<Address>,
    pub salt: Option<B256>,
}

impl TypedDomain {
    /// The asset tag this domain signs under. The name discriminates the
    /// asset, so a nameless domain is unclassifiable.
    pub fn asset(&self) -> KernelResult<B256> {
        match &self.name {
            Some(name) => Ok(typed_data_asset(name)),
            None => Err(KernelError::AssetUnknown),
        }
    }

    /// Reconstruct the `EIP712Domain` type string for the present subset.
    pub fn type_string(&self) -> String {
        let mut params = Vec::new();
        if self.name.is_some() {
            params.push("string name");
        }
        if self.version.is_some() {
            params.push("string version");
        }
        if self.chain_id.is_some() {
            params.push("uint256 chainId");
        }
        if self.verifying_contract.is_some() {
            params.push("address verifyingContract");
        }
        if self.salt.is_some() {
            params.push("bytes32 salt");
        }
        format!("EIP712Domain({})", params.join(","))
    }

    /// The domain separator: `Keccak-256(typeHash ∥ encoded parameters)`.
    pub fn separator(&self) -> B256 {
        let mut buf = Vec::with_capacity(32 * 6);
        buf.extend_from_slice(keccak256(self.type_string().as_bytes()).as_slice());
        if let Some(name) = &self.name {
            buf.extend_from_slice(keccak256(name.as_bytes()).as_slice());
        }
        if let Some(version) = &self.version {
            buf.extend_from_slice(keccak256(version.as_bytes()).as_slice());
        }
        if let Some(chain_id) = &self.chain_id {
            buf.extend_from_slice(&chain_id.to_be_bytes::<32>());
        }
        if let Some(contract) = &self.verifying_contract {
            buf.extend_from_slice(&[0u8; 12]);
            buf.extend_from_slice(contract.as_slice());
        }
        if let Some(salt) = &self.salt {
            buf.extend_from_slice(salt.as_slice());
        }
        keccak256(&buf)
    }
}

/// Assemble the EIP-712 signing digest:
/// `Keccak-256(0x19 0x01 ∥ domainSeparator ∥ Keccak-256(typeHash ∥ encodedData))`.
pub fn typed_data_digest(domain: &TypedDomain, type_string: &str, encoded_data: &[u8]) -> B256 {
    let type_hash = keccak256(type_string.as_bytes());
    let mut struct_preimage = Vec::with_capacity(32 + encoded_data.len());
    struct_preimage.extend_from_slice(type_hash.as_slice());
    struct_preimage.extend_from_slice(encoded_data);
    let struct_hash = keccak256(&struct_preimage);

    let mut digest_preimage = Vec::with_capacity(2 + 64);
    digest_preimage.extend_from_slice(&[0x19, 0x01]);
    digest_preimage.extend_from_slice(domain.separator().as_slice());
    digest_preimage.extend_from_slice(struct_hash.as_slice());
    keccak256(&digest_preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_eip712_envelopes_classify_to_zero() {
        assert_eq!(classify(&[0x19, 0x01, 0xAA]), B256::ZERO);
    }

    #[test]
    fn signed_message_prefix_classifies() {
        assert_eq!(classify(&[0x19, 0x45, b'h', b'i']), signed_message_asset());
    }

    #[test]
    fn leading_0x02_always_classifies_as_transaction() {
        // The ambiguity is intentional: any payload starting 0x02 is the
        // transaction asset, whether or not it parses as one.
        assert_eq!(classify(&[0x02]), transaction_asset());
        assert_eq!(classify(&[0x02, 0xFF, 0xFF]), transaction_asset());
    }

    #[test]
    fn unknown_payloads_classify_to_zero() {
        assert_eq!(classify(&[]), B256::ZERO);
        assert_eq!(classify(&[0x19]), B256::ZERO);
        assert_eq!(classify(&[0x03, 0x01]), B256::ZERO);
        assert_eq!(classify(b"hello"), B256::ZERO);
    }

    #[test]
    fn typed_data_asset_depends_on_name_only() {
        let a = TypedDomain {
            name: Some("Mail".into()),
            version: Some("1".into()),
            ..Default::default()
        };
        let b = TypedDomain {
            name: Some("Mail".into()),
            chain_id: Some(U256::from(5)),
            ..Default::default()
        };
        assert_eq!(a.asset().unwrap(), b.asset().unwrap());
        assert_eq!(a.asset().unwrap(), typed_data_asset("Mail"));
    }

    #[test]
    fn nameless_domain_is_unclassifiable() {
        let domain = TypedDomain {
            version: Some("1".into()),
            ..Default::default()
        };
        assert!(matches!(domain.asset(), Err(KernelError::AssetUnknown)));
    }

    #[test]
    fn type_string_follows_subset_order() {
        let domain = TypedDomain {
            name: Some("Mail".into()),
            chain_id: Some(U256::from(1)),
            salt: Some(B256::repeat_byte(1)),
            ..Default::default()
        };
        assert_eq!(
            domain.type_string(),
            "EIP712Domain(string name,uint256 chainId,bytes32 salt)"
        );
    }

    #[test]
    fn full_domain_separator_matches_reference_vector() {
        // EIP-712 reference example domain.
        let domain = TypedDomain {
            name: Some("Ether Mail".into()),
            version: Some("1".into()),
            chain_id: Some(U256::from(1)),
            verifying_contract: Some(
                "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
                    .parse()
                    .unwrap(),
            ),
            salt: None,
        };
        assert_eq!(
            domain.type_string(),
            "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)"
        );
        assert_eq!(
            domain.separator(),
            "0xf2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
                .parse::<B256>()
                .unwrap()
        );
    }

    #[test]
    fn destination_asset_binds_chain_and_recipient() {
        let to: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        let other: Address = "0x00000000000000000000000000000000000000ab".parse().unwrap();
        assert_ne!(destination_asset(1, to), destination_asset(2, to));
        assert_ne!(destination_asset(1, to), destination_asset(1, other));
    }
}
