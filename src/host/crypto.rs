// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! secp256k1 key handling inside the enclave.
//!
//! Private keys exist only as bytes in sealed storage and as ephemeral
//! `SigningKey` values on the stack during a signing dispatch. Signatures
//! are produced over externally supplied 32-byte digests (the kernel hashes
//! payloads with Keccak-256 before calling in here) and returned DER
//! encoded.

use alloy::primitives::{keccak256, Address, B256};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::StdRng;

use crate::error::{KernelError, KernelResult};

/// A freshly generated secp256k1 keypair.
///
/// `public` is the 65-byte uncompressed SEC1 encoding; `secret` is the raw
/// 32-byte scalar, written straight into sealed storage by the registry.
#[derive(Clone)]
pub struct SecpKeypair {
    pub secret: [u8; 32],
    pub public: Vec<u8>,
}

/// Generate a keypair from host entropy.
pub fn generate_keypair(rng: &mut StdRng) -> SecpKeypair {
    let signing = SigningKey::random(rng);
    let public = signing
        .verifying_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&signing.to_bytes());
    SecpKeypair { secret, public }
}

/// Derive the externally visible address from an uncompressed SEC1 public
/// key: the low 20 bytes of `Keccak-256` over the 64 coordinate bytes.
pub fn eth_address(public_sec1: &[u8]) -> KernelResult<Address> {
    if public_sec1.len() != 65 || public_sec1[0] != 0x04 {
        return Err(KernelError::InvalidPayload(
            "expected a 65-byte uncompressed SEC1 public key".into(),
        ));
    }
    let hash = keccak256(&public_sec1[1..]);
    Ok(Address::from_slice(&hash[12..]))
}

/// Sign a prehashed 32-byte digest, returning a DER-encoded signature.
pub fn sign_prehashed(secret: &[u8; 32], digest: B256) -> KernelResult<Vec<u8>> {
    let signing = SigningKey::from_slice(secret)
        .map_err(|e| KernelError::InvalidPayload(format!("corrupt signing key: {e}")))?;
    let signature: Signature = signing
        .sign_prehash(digest.as_slice())
        .map_err(|e| KernelError::InvalidPayload(format!("signing failed: {e}")))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verify a DER signature over a prehashed digest against an uncompressed
/// SEC1 public key. Used by callers checking round trips; the kernel itself
/// never verifies its own signatures.
pub fn verify_prehashed(public_sec1: &[u8], digest: B256, der: &[u8]) -> bool {
    let Ok(verifying) = VerifyingKey::from_sec1_bytes(public_sec1) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(der) else {
        return false;
    };
    verifying.verify_prehash(digest.as_slice(), &signature).is_ok()
}
