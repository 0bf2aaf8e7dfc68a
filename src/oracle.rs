// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Foreign-chain trust interfaces.
//!
//! The kernel never runs a light client. A deployment injects two
//! collaborators: a block-hash oracle attesting to finalized foreign-chain
//! header hashes, and a proof verifier that walks Merkle-Patricia paths
//! against a header the kernel has already matched to the oracle. The
//! kernel's own checks are limited to byte equality: supplied header bytes
//! must hash to the oracle's answer, and the verifier's included
//! transaction must equal the transaction the caller claims.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::error::KernelResult;

/// Supplies trusted foreign-chain header hashes.
pub trait BlockHashOracle {
    /// The finalized header hash for `(chain_id, block_number)`, or `None`
    /// when the oracle has not attested to that height.
    fn block_hash(&self, chain_id: u64, block_number: u64) -> Option<B256>;
}

/// A transaction-inclusion proof against a specific header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInclusionProof {
    pub chain_id: u64,
    pub block_number: u64,
    /// RLP header bytes; their Keccak-256 must equal the oracle's hash.
    pub header: Bytes,
    /// Index of the proved transaction within the block.
    pub transaction_index: u64,
    /// Merkle-Patricia path from the header's `transactionsRoot` to the
    /// RLP-encoded transaction. Opaque to the kernel.
    pub nodes: Vec<Bytes>,
}

/// A storage-slot proof against a specific header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProof {
    pub chain_id: u64,
    pub block_number: u64,
    pub header: Bytes,
    pub address: Address,
    pub slot: B256,
    /// Account path from the header's `stateRoot`.
    pub account_nodes: Vec<Bytes>,
    /// Storage path from the account's storage root.
    pub storage_nodes: Vec<Bytes>,
}

/// Result of a validated transaction-inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedInclusion {
    /// The serialized transaction the proof path actually commits to.
    pub transaction: Bytes,
    /// The validated header's timestamp.
    pub block_timestamp: DateTime<Utc>,
}

/// Verifies Merkle-Patricia proofs against a header.
///
/// The verifier may assume the header bytes are authentic: the kernel
/// checks them against the oracle before calling in.
pub trait ProofVerifier {
    /// Validate a transaction-inclusion path and return the transaction it
    /// commits to, with the header's timestamp.
    fn validate_tx_proof(&self, proof: &TxInclusionProof) -> KernelResult<VerifiedInclusion>;

    /// Validate an account-state + storage path and return the slot value.
    fn validate_storage_proof(&self, proof: &StorageProof) -> KernelResult<U256>;
}

// =============================================================================
// Header-hash cache
// =============================================================================

/// Bounded LRU cache over an injected oracle.
///
/// A finalized header hash never changes, so cached answers stay valid for
/// the life of the process. Negative answers are not cached: the oracle may
/// learn about a height later.
pub struct CachedOracle<O> {
    inner: O,
    cache: Mutex<LruCache<(u64, u64), B256>>,
}

impl<O: BlockHashOracle> CachedOracle<O> {
    pub fn new(inner: O, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl<O: BlockHashOracle> BlockHashOracle for CachedOracle<O> {
    fn block_hash(&self, chain_id: u64, block_number: u64) -> Option<B256> {
        let key = (chain_id, block_number);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hash) = cache.get(&key) {
                return Some(*hash);
            }
        }
        let hash = self.inner.block_hash(chain_id, block_number)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, hash);
        }
        Some(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingOracle {
        calls: Cell<u32>,
    }

    impl BlockHashOracle for CountingOracle {
        fn block_hash(&self, chain_id: u64, block_number: u64) -> Option<B256> {
            self.calls.set(self.calls.get() + 1);
            if chain_id == 1 && block_number == 100 {
                Some(B256::repeat_byte(0xAB))
            } else {
                None
            }
        }
    }

    #[test]
    fn cache_hits_skip_the_inner_oracle() {
        let oracle = CachedOracle::new(
            CountingOracle { calls: Cell::new(0) },
            NonZeroUsize::new(4).unwrap(),
        );
        assert_eq!(oracle.block_hash(1, 100), Some(B256::repeat_byte(0xAB)));
        assert_eq!(oracle.block_hash(1, 100), Some(B256::repeat_byte(0xAB)));
        assert_eq!(oracle.inner.calls.get(), 1);
    }

    #[test]
    fn negative_answers_are_not_cached() {
        let oracle = CachedOracle::new(
            CountingOracle { calls: Cell::new(0) },
            NonZeroUsize::new(4).unwrap(),
        );
        assert_eq!(oracle.block_hash(1, 999), None);
        assert_eq!(oracle.block_hash(1, 999), None);
        assert_eq!(oracle.inner.calls.get(), 2);
    }
}
