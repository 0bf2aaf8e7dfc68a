// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration Constants
//!
//! This module defines environment variable names and fixed protocol
//! constants used throughout the kernel. There are no configuration files:
//! the confidential host supplies deployment configuration through the
//! environment and through the injected oracle/verifier interfaces.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `KERNEL_DATA_DIR` | Root directory for sealed persistent state | `/data` |

/// Environment variable name for the sealed data directory path.
///
/// The data directory must be mounted as the host's encrypted filesystem;
/// the kernel performs plain file I/O and relies on the host for
/// confidentiality and integrity.
pub const DATA_DIR_ENV: &str = "KERNEL_DATA_DIR";

/// Default sealed data directory (encrypted mount point).
pub const DEFAULT_DATA_DIR: &str = "/data";

/// Incremental inclusion-proof verification gas per started kilobyte of
/// transaction calldata.
///
/// Calibrated to the foreign-chain proof verifier's gas curve. The estimate
/// must stay monotone non-decreasing in the calldata length.
pub const PROOF_GAS_PER_KILOBYTE: u64 = 86_853;

/// Flat inclusion-proof verification gas independent of calldata length.
pub const PROOF_GAS_BASE: u64 = 289_032;

/// Gas price assumed when converting proof gas into a wei reimbursement:
/// 100 gwei.
pub const PROOF_GAS_PRICE_WEI: u64 = 100_000_000_000;

/// Size in bytes of the transport nonce carried by every envelope
/// ciphertext. Fresh random bytes per ciphertext; never reused.
pub const TRANSPORT_NONCE_LEN: usize = 32;

/// HKDF domain-separation label for the key-export envelope.
pub const ENVELOPE_HKDF_LABEL: &[u8] = b"encumbrance-kernel/envelope/v1";

/// Leading string of the ABI-encoded tag a counterparty must encrypt to the
/// registry's static export key to prove control of its X25519 secret.
pub const EXPORT_TAG_PREFIX: &str = "Key export";

/// Pattern written over a wallet's private-key slot by
/// `destroy_exported_key`.
pub const DESTROYED_KEY_FILL: u8 = 0xFF;

/// Domain-separation input for deriving the Ethereum-transaction policy's
/// own principal address (the address under which it enrolls against the
/// wallet registry).
pub const ETH_TX_POLICY_DOMAIN: &[u8] = b"encumbrance-kernel/eth-tx-policy/v1";
