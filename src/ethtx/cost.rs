// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inclusion-proof reimbursement cost model.
//!
//! Whoever submits an inclusion proof is reimbursed from the responsible
//! sub-policy's local collateral. The estimate converts proof-verification
//! gas into wei at a fixed price; the gas curve is linear in the proved
//! transaction's calldata length.

use alloy::primitives::U256;

use crate::config::{PROOF_GAS_BASE, PROOF_GAS_PER_KILOBYTE, PROOF_GAS_PRICE_WEI};

/// Estimated reimbursement in wei for proving a transaction whose calldata
/// is `payload_len` bytes.
///
/// `((payload_len / 1024) · per-KiB gas + base gas) · 100 gwei`.
pub fn estimate_inclusion_proof_cost(payload_len: usize) -> U256 {
    let kilobytes = (payload_len as u64) / 1024;
    let gas = kilobytes * PROOF_GAS_PER_KILOBYTE + PROOF_GAS_BASE;
    U256::from(gas) * U256::from(PROOF_GAS_PRICE_WEI)
}
