// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encumbrance Kernel - TEE-Resident Key Custody with Programmable Leases
//!
//! This crate is the trust kernel of a confidential key-custody service:
//! it generates and guards secp256k1 keys whose owners never see the
//! private material, and mediates every signature through time-bounded
//! leases ("encumbrances") granted to policy principals. A built-in
//! Ethereum-transaction policy sub-leases signing authority per
//! `(chainId, destination)` and keeps per-sub-policy value ledgers honest
//! against foreign-chain inclusion proofs.
//!
//! ## Modules
//!
//! - `kernel` - Top-level dispatcher (transactional boundary, audit)
//! - `registry` - Encumbered-wallet registry (custody, leases, export)
//! - `ethtx` - Ethereum-transaction policy (sub-leases, ledgers, proofs)
//! - `policy` - Policy SPI (enrollment hook with veto power)
//! - `assets` - Asset classification (payload → 32-byte tag)
//! - `cell` - Delayed-finalization cells (one-block write barrier)
//! - `envelope` - X25519 + AEAD key-transport envelope
//! - `oracle` - Injected block-hash oracle and proof-verifier interfaces
//! - `host` - Host crypto primitives and block environment
//! - `storage` - Sealed snapshots and audit history (host-encrypted FS)

pub mod assets;
pub mod cell;
pub mod config;
pub mod envelope;
pub mod error;
pub mod ethtx;
pub mod host;
pub mod kernel;
pub mod oracle;
pub mod policy;
pub mod registry;
pub mod storage;

pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
