// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated key-transport envelope.
//!
//! ECIES-style construction used in both directions of the key-export
//! flow: X25519 agreement between the registry's static export key and the
//! counterparty's key, HKDF-SHA256 expansion of the shared secret into an
//! AES-256-GCM key and nonce, then AEAD with caller-supplied associated
//! data.
//!
//! Every ciphertext carries a fresh random 32-byte transport nonce. The
//! transport nonce is the HKDF salt, so the AEAD key and the 12-byte GCM
//! nonce are unique per ciphertext; nonce reuse is structurally impossible
//! as long as the transport nonce is fresh.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::StdRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::{ENVELOPE_HKDF_LABEL, TRANSPORT_NONCE_LEN};
use crate::error::{KernelError, KernelResult};

/// A sealed payload plus the transport nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; TRANSPORT_NONCE_LEN],
}

/// Generate an X25519 keypair from host entropy, as raw bytes.
pub fn generate_keypair(rng: &mut StdRng) -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(rng);
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

/// Draw a fresh transport nonce from host entropy.
pub fn fresh_nonce(rng: &mut StdRng) -> [u8; TRANSPORT_NONCE_LEN] {
    let mut nonce = [0u8; TRANSPORT_NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Seal `plaintext` for the holder of `remote_public`.
pub fn seal(
    local_secret: &[u8; 32],
    remote_public: &[u8; 32],
    nonce: [u8; TRANSPORT_NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> KernelResult<SealedEnvelope> {
    let (key, gcm_nonce) = derive(local_secret, remote_public, &nonce);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| KernelError::Envelope("bad key"))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&gcm_nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| KernelError::Envelope("encryption failed"))?;
    Ok(SealedEnvelope { ciphertext, nonce })
}

/// Open a ciphertext sealed to us by the holder of `remote_public`.
pub fn open(
    local_secret: &[u8; 32],
    remote_public: &[u8; 32],
    nonce: &[u8; TRANSPORT_NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> KernelResult<Vec<u8>> {
    let (key, gcm_nonce) = derive(local_secret, remote_public, nonce);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| KernelError::Envelope("bad key"))?;
    cipher
        .decrypt(
            Nonce::from_slice(&gcm_nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| KernelError::Envelope("decryption failed"))
}

/// X25519 agreement, then HKDF-SHA256 expansion into a 32-byte AEAD key
/// and a 12-byte GCM nonce, salted by the transport nonce.
fn derive(
    local_secret: &[u8; 32],
    remote_public: &[u8; 32],
    nonce: &[u8; TRANSPORT_NONCE_LEN],
) -> ([u8; 32], [u8; 12]) {
    let secret = StaticSecret::from(*local_secret);
    let shared = secret.diffie_hellman(&PublicKey::from(*remote_public));

    let hk = Hkdf::<Sha256>::new(Some(nonce.as_slice()), shared.as_bytes());
    let mut okm = [0u8; 44];
    // Expand cannot fail for a 44-byte request with SHA-256.
    hk.expand(ENVELOPE_HKDF_LABEL, &mut okm)
        .expect("44-byte HKDF expansion");

    let mut key = [0u8; 32];
    let mut gcm_nonce = [0u8; 12];
    key.copy_from_slice(&okm[..32]);
    gcm_nonce.copy_from_slice(&okm[32..]);
    (key, gcm_nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::from_seed([7u8; 32])
    }

    #[test]
    fn seal_open_round_trip_in_both_directions() {
        let mut rng = rng();
        let (sk_a, pk_a) = generate_keypair(&mut rng);
        let (sk_b, pk_b) = generate_keypair(&mut rng);

        let sealed = seal(&sk_a, &pk_b, fresh_nonce(&mut rng), b"secret", b"aad").unwrap();
        let opened = open(&sk_b, &pk_a, &sealed.nonce, &sealed.ciphertext, b"aad").unwrap();
        assert_eq!(opened, b"secret");
    }

    #[test]
    fn wrong_aad_fails() {
        let mut rng = rng();
        let (sk_a, pk_a) = generate_keypair(&mut rng);
        let (sk_b, pk_b) = generate_keypair(&mut rng);

        let sealed = seal(&sk_a, &pk_b, fresh_nonce(&mut rng), b"secret", b"aad").unwrap();
        let result = open(&sk_b, &pk_a, &sealed.nonce, &sealed.ciphertext, b"other");
        assert!(matches!(result, Err(KernelError::Envelope(_))));
    }

    #[test]
    fn wrong_counterparty_fails() {
        let mut rng = rng();
        let (sk_a, _) = generate_keypair(&mut rng);
        let (_, pk_b) = generate_keypair(&mut rng);
        let (sk_c, pk_c) = generate_keypair(&mut rng);

        let sealed = seal(&sk_a, &pk_b, fresh_nonce(&mut rng), b"secret", b"").unwrap();
        let result = open(&sk_c, &pk_c, &sealed.nonce, &sealed.ciphertext, b"");
        assert!(result.is_err());
    }

    #[test]
    fn distinct_nonces_give_distinct_ciphertexts() {
        let mut rng = rng();
        let (sk_a, _pk_a) = generate_keypair(&mut rng);
        let (_sk_b, pk_b) = generate_keypair(&mut rng);

        let first = seal(&sk_a, &pk_b, fresh_nonce(&mut rng), b"secret", b"").unwrap();
        let second = seal(&sk_a, &pk_b, fresh_nonce(&mut rng), b"secret", b"").unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }
}
