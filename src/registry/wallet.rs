// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet records.
//!
//! A wallet is identified externally by its Keccak-derived address and
//! internally carries the full keypair. The private scalar never leaves
//! this struct except into the signing primitive and, after an export, into
//! the envelope.

use alloy::primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::DelayedCell;

/// A custodied wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Uncompressed SEC1 public key (65 bytes).
    pub public_key: Bytes,
    /// Raw private scalar. Confidentiality of the serialized form is the
    /// host storage's responsibility.
    pub(crate) secret: [u8; 32],
    /// Externally visible address, the low 20 bytes of Keccak-256 over the
    /// public-key coordinates.
    pub address: Address,
    /// Current access manager. Settled at creation; ownership transfers
    /// write it, taking effect at strictly greater block numbers.
    pub manager: DelayedCell<Address>,
    /// Owner-facing index under the current manager.
    pub account_index: U256,
    /// Maximum expiry across all leases ever granted on this wallet.
    /// Key export requires this to be strictly in the past.
    pub max_lease_expiry: Option<DateTime<Utc>>,
    /// Key-export state machine.
    pub export: ExportState,
}

/// Per-wallet key-export state:
/// `Live → ExportPending → Exported → Destroyed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportState {
    /// Counterparty X25519 public key recorded by the export request.
    pub counterparty: Option<[u8; 32]>,
    /// Delayed export flag: pending in the request's block, authoritative
    /// one block later.
    pub requested: DelayedCell<bool>,
    /// Set once the private-key slot has been overwritten.
    pub destroyed: bool,
}

impl ExportState {
    /// Whether an export has ever been requested, finalized or not.
    /// Write operations are refused from the request onward.
    pub fn requested_at_all(&self) -> bool {
        *self.requested.raw()
    }

    /// Whether the export flag is finalized true at `block`.
    pub fn is_exported(&self, block: u64) -> bool {
        self.requested.is_finalized_eq(&true, block)
    }
}

/// One entry of a principal's append-only attended-wallet log, letting a
/// transfer recipient discover the fresh account index chosen for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendedWallet {
    pub account_index: U256,
    pub created_block: u64,
}

/// An encumbrance lease on one `(wallet, asset)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Leaseholder principal; written in the enrollment block, so the
    /// lease is unusable until the next block.
    pub policy: DelayedCell<Address>,
    pub expiry: DateTime<Utc>,
}
