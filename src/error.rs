// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Kernel Error Handling
//!
//! One sum type covers every way a dispatched operation can fail. All
//! kernel errors are non-retryable within the failing dispatch: the
//! dispatcher rolls state back to the pre-call snapshot and the caller must
//! repair the mismatch before reissuing. No error is recovered internally.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};

use crate::storage::StorageError;

/// Result alias used by every kernel operation.
pub type KernelResult<T> = Result<T, KernelError>;

/// Unified error type for all kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The caller is not the principal the operation requires
    /// (owner, leaseholder, or transaction manager).
    #[error("caller is not the required principal for this operation")]
    NotAuthorized,

    /// A delayed-finalization cell has not finalized yet; the value becomes
    /// usable in a strictly later block.
    #[error("value written this block; not finalized until a later block")]
    Pending,

    /// The lease covering this asset has expired.
    #[error("lease expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    /// An unexpired lease already covers this `(wallet, asset)` pair.
    #[error("an unexpired lease already covers this asset")]
    AlreadyEncumbered,

    /// No wallet exists under the given `(principal, account index)` link
    /// or wallet address.
    #[error("wallet not found")]
    WalletNotFound,

    /// The payload classified to the zero asset tag and cannot be signed.
    #[error("payload does not classify to a known asset")]
    AssetUnknown,

    /// A key export has been requested for this wallet; write operations
    /// are refused from that point on.
    #[error("key export requested; wallet refuses further writes")]
    Exported,

    /// A supplied header or proof did not match the trusted oracle or the
    /// expected included transaction.
    #[error("proof mismatch: {0}")]
    ProofMismatch(&'static str),

    /// Idempotency violated: this deposit proof was already accepted.
    #[error("deposit already accounted for")]
    AlreadySeen,

    /// ETH sub-balance or local collateral below the required threshold.
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    /// Signing requires a transaction commitment and none was found.
    #[error("a prior-block transaction commitment is required")]
    CommitmentRequired,

    /// A matching transaction commitment exists but was made in the
    /// current block; it becomes usable in a strictly later block.
    #[error("transaction commitment was made in the current block")]
    CommitmentTooEarly,

    /// Deposit control is enabled and the deposit's header timestamp
    /// precedes the commitment, i.e. the sub-policy tried to claim a
    /// deposit that was already in flight.
    #[error("deposit was included on-chain before the commitment")]
    DepositPredatesCommitment,

    /// The transaction's nonce does not match the account's tracked count.
    #[error("transaction nonce {got} does not match expected {expected}")]
    BadNonce { expected: u64, got: u64 },

    /// The counterparty's encrypted tag did not decrypt to the expected
    /// tuple, so control of the matching X25519 secret is unproven.
    #[error("counterparty failed to prove control of the export key")]
    WrongExportTag,

    /// The caller is not the sub-policy that committed to this deposit.
    #[error("caller did not commit to this deposit")]
    NotCommitter,

    /// The caller does not hold the current lease for this destination.
    #[error("caller does not hold the lease for this destination")]
    NotLeaseholder,

    /// Enrollment named a policy principal with no registered callback.
    #[error("no policy is registered under principal {0}")]
    UnknownPolicy(Address),

    /// A policy's enrollment hook vetoed the enrollment.
    #[error("policy rejected enrollment: {0}")]
    PolicyRejected(String),

    /// The supplied bytes could not be decoded or failed structural
    /// validation (malformed transaction envelope, zero policy address,
    /// bad signature encoding, and similar).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Envelope encryption or decryption failed.
    #[error("envelope failure: {0}")]
    Envelope(&'static str),

    /// The host attempted to move the block environment backwards.
    #[error("block number must not decrease")]
    NonMonotonicBlock,

    /// Sealed-storage failure surfaced during boot or explicit persistence.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl KernelError {
    /// Short stable identifier for audit records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::NotAuthorized => "not_authorized",
            KernelError::Pending => "pending",
            KernelError::Expired { .. } => "expired",
            KernelError::AlreadyEncumbered => "already_encumbered",
            KernelError::WalletNotFound => "wallet_not_found",
            KernelError::AssetUnknown => "asset_unknown",
            KernelError::Exported => "exported",
            KernelError::ProofMismatch(_) => "proof_mismatch",
            KernelError::AlreadySeen => "already_seen",
            KernelError::InsufficientBalance { .. } => "insufficient_balance",
            KernelError::CommitmentRequired => "commitment_required",
            KernelError::CommitmentTooEarly => "commitment_too_early",
            KernelError::DepositPredatesCommitment => "deposit_predates_commitment",
            KernelError::BadNonce { .. } => "bad_nonce",
            KernelError::WrongExportTag => "wrong_export_tag",
            KernelError::NotCommitter => "not_committer",
            KernelError::NotLeaseholder => "not_leaseholder",
            KernelError::UnknownPolicy(_) => "unknown_policy",
            KernelError::PolicyRejected(_) => "policy_rejected",
            KernelError::InvalidPayload(_) => "invalid_payload",
            KernelError::Envelope(_) => "envelope",
            KernelError::NonMonotonicBlock => "non_monotonic_block",
            KernelError::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(KernelError::NotAuthorized.code(), "not_authorized");
        assert_eq!(
            KernelError::BadNonce { expected: 1, got: 0 }.code(),
            "bad_nonce"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = KernelError::InsufficientBalance {
            required: U256::from(10),
            available: U256::from(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("3"));
    }
}
