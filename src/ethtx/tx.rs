// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EIP-1559 envelope handling.
//!
//! The policy deals in two forms of a transaction: the unsigned
//! `0x02`-prefixed signing payload (what the registry signs) and the signed
//! 2718 envelope (what deposit and inclusion proofs carry). Everything here
//! is a thin layer over alloy's consensus types.

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{SignableTransaction, Signed, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::{Decodable2718, Encodable2718};
use alloy::primitives::{Address, TxKind, B256, U256};

use crate::error::{KernelError, KernelResult};

/// Decode a signed EIP-1559 envelope from 2718 bytes.
pub fn decode_signed(bytes: &[u8]) -> KernelResult<Signed<TxEip1559>> {
    let envelope = TxEnvelope::decode_2718(&mut &bytes[..])
        .map_err(|e| KernelError::InvalidPayload(format!("transaction decode: {e}")))?;
    match envelope {
        TxEnvelope::Eip1559(signed) => Ok(signed),
        other => Err(KernelError::InvalidPayload(format!(
            "unsupported transaction envelope type {:?}",
            other.tx_type()
        ))),
    }
}

/// Canonical 2718 encoding of a signed transaction.
pub fn encode_signed(signed: &Signed<TxEip1559>) -> Vec<u8> {
    TxEnvelope::Eip1559(signed.clone()).encoded_2718()
}

/// Recover the signer address from the envelope's signature.
pub fn recover_signer(signed: &Signed<TxEip1559>) -> KernelResult<Address> {
    signed
        .recover_signer()
        .map_err(|e| KernelError::InvalidPayload(format!("signer recovery: {e}")))
}

/// The call destination. Contract creation is not a destination the policy
/// can lease.
pub fn destination(tx: &TxEip1559) -> KernelResult<Address> {
    match tx.to {
        TxKind::Call(address) => Ok(address),
        TxKind::Create => Err(KernelError::InvalidPayload(
            "contract-creation transactions have no destination".into(),
        )),
    }
}

/// Hash of the unsigned `0x02`-prefixed payload; the transaction-commitment
/// key.
pub fn unsigned_hash(tx: &TxEip1559) -> B256 {
    tx.signature_hash()
}

/// The unsigned `0x02`-prefixed bytes the registry signs.
pub fn signing_payload(tx: &TxEip1559) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tx.input.len() + 128);
    tx.encode_for_signing(&mut buf);
    buf
}

/// Worst-case spend of a transaction: `value + gasLimit · maxFeePerGas`.
pub fn max_cost(tx: &TxEip1559) -> U256 {
    U256::from(tx.gas_limit)
        .saturating_mul(U256::from(tx.max_fee_per_gas))
        .saturating_add(tx.value)
}
