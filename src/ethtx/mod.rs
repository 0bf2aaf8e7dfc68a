// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ethereum-transaction policy.
//!
//! This policy enrolls against the wallet registry for the transaction
//! asset and sub-leases the right to sign toward specific
//! `(chainId, destination)` pairs to downstream sub-policies. It keeps the
//! value attributed to each sub-policy honest: ETH sub-balances grow only
//! on proved foreign-chain deposits, shrink by the worst-case cost of
//! proved outbound transactions, and inclusion-proof submitters are
//! reimbursed from collateral the responsible sub-policy posted up front.
//!
//! ## Commitment discipline
//!
//! A sub-policy that enrolled with signature commitments required must
//! commit to a transaction (which pins the authoritative nonce) in an
//! earlier block than the signature request. Deposits work the same way:
//! the deposit hash is committed first-writer-wins, and with deposit
//! control enabled a deposit already in flight at commitment time is
//! rejected.
//!
//! ## Nonce ordering
//!
//! Signing never advances `txCount`; only an accepted inclusion proof
//! does. A sub-policy can therefore obtain a signature for nonce `n` and
//! the next one only after proving the first landed.

pub mod cost;
pub mod ledger;
pub mod tx;

use std::collections::{HashMap, HashSet};

use alloy::consensus::TxEip1559;
use alloy::primitives::{keccak256, Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::{destination_asset, transaction_asset};
use crate::cell::DelayedCell;
use crate::config::ETH_TX_POLICY_DOMAIN;
use crate::error::{KernelError, KernelResult};
use crate::host::BlockEnv;
use crate::oracle::{BlockHashOracle, ProofVerifier, TxInclusionProof};
use crate::policy::{EncumbrancePolicy, Enrollment};

pub use ledger::{PendingFunds, SubBalanceLedger};

/// A sub-leaseable destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub chain_id: u64,
    pub to: Address,
}

/// Enrollment terms for a sub-lease.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubLeaseTerms {
    /// When set, every signature request must be preceded by a
    /// prior-block transaction commitment.
    pub signature_commitments_required: bool,
    /// When set, deposits already in flight at commitment time are
    /// rejected.
    pub uses_deposit_control: bool,
}

/// Per-account state installed by the enrollment hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedAccount {
    /// The transaction manager: the principal that enrolled this policy
    /// and may grant sub-leases.
    pub manager: Address,
    /// Our own lease expiry on the account; sub-leases may not outlive it.
    pub lease_expiry: DateTime<Utc>,
}

/// A sub-lease on one `(account, destination asset)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubLease {
    pub policy: DelayedCell<Address>,
    pub expiry: DateTime<Utc>,
}

/// A first-writer-wins claim on a foreign-chain deposit hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCommitment {
    pub sub_policy: Address,
    pub committed_at: DateTime<Utc>,
}

/// A pinned outgoing transaction: accounting goes to this sub-policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCommitment {
    pub sub_policy: Address,
    pub block: u64,
}

fn lease_key(account: Address, asset: B256) -> String {
    format!("{account}|{asset}")
}

fn nonce_key(account: Address, chain_id: u64) -> String {
    format!("{account}|{chain_id}")
}

fn commit_key(account: Address, unsigned_hash: B256) -> String {
    format!("{account}|{unsigned_hash}")
}

fn included_key(signer: Address, sub_policy: Address) -> String {
    format!("{signer}|{sub_policy}")
}

/// The Ethereum-transaction policy (component G).
#[derive(Clone, Serialize, Deserialize)]
pub struct EthereumTxPolicy {
    principal: Address,
    accounts: HashMap<Address, ManagedAccount>,
    sub_leases: HashMap<String, SubLease>,
    ledger: SubBalanceLedger,
    tx_count: HashMap<String, u64>,
    deposit_commits: HashMap<B256, DepositCommitment>,
    deposits_seen: HashSet<B256>,
    tx_commits: HashMap<String, TxCommitment>,
    /// `account|destAsset` → the most recent sub-policy enrolled without
    /// the commitment requirement.
    last_unlimited: HashMap<String, Address>,
    deposit_control: HashMap<Address, bool>,
    /// `signer|subPolicy` → hashes of proved outbound transactions.
    included: HashMap<String, Vec<B256>>,
}

impl Default for EthereumTxPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EthereumTxPolicy {
    pub fn new() -> Self {
        let digest = keccak256(ETH_TX_POLICY_DOMAIN);
        Self {
            principal: Address::from_slice(&digest[12..]),
            accounts: HashMap::new(),
            sub_leases: HashMap::new(),
            ledger: SubBalanceLedger::default(),
            tx_count: HashMap::new(),
            deposit_commits: HashMap::new(),
            deposits_seen: HashSet::new(),
            tx_commits: HashMap::new(),
            last_unlimited: HashMap::new(),
            deposit_control: HashMap::new(),
            included: HashMap::new(),
        }
    }

    /// The principal address this policy enrolls under.
    pub fn principal(&self) -> Address {
        self.principal
    }

    // =========================================================================
    // Read surface
    // =========================================================================

    pub fn transaction_manager(&self, account: Address) -> Option<ManagedAccount> {
        self.accounts.get(&account).copied()
    }

    pub fn sub_lease(&self, account: Address, asset: B256) -> Option<&SubLease> {
        self.sub_leases.get(&lease_key(account, asset))
    }

    pub fn eth_balance(&self, sub_policy: Address, account: Address, chain_id: u64) -> U256 {
        self.ledger.eth_balance(sub_policy, account, chain_id)
    }

    pub fn local_balance_finalized(
        &self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
    ) -> U256 {
        self.ledger.local_finalized(sub_policy, account, chain_id)
    }

    pub fn local_balance_pending(
        &self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
    ) -> Option<PendingFunds> {
        self.ledger.local_pending(sub_policy, account, chain_id)
    }

    /// Total ETH attributed for `(account, chain)` across sub-policies.
    pub fn eth_total(&self, account: Address, chain_id: u64) -> U256 {
        self.ledger.eth_total(account, chain_id)
    }

    /// The next nonce this policy will sign for `(account, chain)`.
    pub fn tx_count(&self, account: Address, chain_id: u64) -> u64 {
        self.tx_count
            .get(&nonce_key(account, chain_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn included_transactions(&self, signer: Address, sub_policy: Address) -> &[B256] {
        self.included
            .get(&included_key(signer, sub_policy))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // =========================================================================
    // Sub-leasing
    // =========================================================================

    /// Install sub-leases for `sub_policy` over `destinations` on
    /// `account`.
    ///
    /// Returns the destination asset tags; the dispatcher delivers the
    /// sub-policy's enrollment notification against them.
    pub fn enter_sub_lease(
        &mut self,
        caller: Address,
        account: Address,
        destinations: &[Destination],
        sub_policy: Address,
        expiry: DateTime<Utc>,
        terms: SubLeaseTerms,
        env: BlockEnv,
    ) -> KernelResult<Vec<B256>> {
        let managed = self
            .accounts
            .get(&account)
            .ok_or(KernelError::NotAuthorized)?;
        if managed.manager != caller {
            return Err(KernelError::NotAuthorized);
        }
        if sub_policy == Address::ZERO {
            return Err(KernelError::InvalidPayload(
                "sub-policy must not be the zero address".into(),
            ));
        }
        if expiry <= env.timestamp {
            return Err(KernelError::Expired { expired_at: expiry });
        }
        if expiry > managed.lease_expiry {
            return Err(KernelError::InvalidPayload(
                "sub-lease expiry exceeds the policy's own lease".into(),
            ));
        }

        let assets: Vec<B256> = destinations
            .iter()
            .map(|d| destination_asset(d.chain_id, d.to))
            .collect();

        for asset in &assets {
            if let Some(prior) = self.sub_leases.get(&lease_key(account, *asset)) {
                if prior.expiry >= env.timestamp {
                    return Err(KernelError::AlreadyEncumbered);
                }
            }
        }

        for asset in &assets {
            self.sub_leases.insert(
                lease_key(account, *asset),
                SubLease {
                    policy: DelayedCell::written(sub_policy, env.number),
                    expiry,
                },
            );
            if !terms.signature_commitments_required {
                self.last_unlimited
                    .insert(lease_key(account, *asset), sub_policy);
            }
        }
        self.deposit_control
            .insert(sub_policy, terms.uses_deposit_control);
        Ok(assets)
    }

    /// Manager-only: clear the commitment obligation by recording the
    /// current leaseholder as the unlimited signer for the destination.
    pub fn release_commitment_requirement(
        &mut self,
        caller: Address,
        account: Address,
        destination_asset: B256,
        env: BlockEnv,
    ) -> KernelResult<()> {
        let managed = self
            .accounts
            .get(&account)
            .ok_or(KernelError::NotAuthorized)?;
        if managed.manager != caller {
            return Err(KernelError::NotAuthorized);
        }
        let lease = self
            .sub_leases
            .get(&lease_key(account, destination_asset))
            .ok_or(KernelError::NotLeaseholder)?;
        let holder = *lease.policy.finalized(env.number)?;
        self.last_unlimited
            .insert(lease_key(account, destination_asset), holder);
        Ok(())
    }

    /// The finalized current leaseholder of `(account, asset)`, if any.
    fn current_leaseholder(&self, account: Address, asset: B256, env: BlockEnv) -> Option<Address> {
        self.sub_leases
            .get(&lease_key(account, asset))
            .and_then(|lease| lease.policy.finalized(env.number).ok())
            .copied()
    }

    /// Authorize `caller` as the unexpired, finalized leaseholder.
    fn authorize_sub_lease(
        &self,
        caller: Address,
        account: Address,
        asset: B256,
        env: BlockEnv,
    ) -> KernelResult<()> {
        let lease = self
            .sub_leases
            .get(&lease_key(account, asset))
            .ok_or(KernelError::NotLeaseholder)?;
        if lease.expiry <= env.timestamp {
            return Err(KernelError::Expired {
                expired_at: lease.expiry,
            });
        }
        if !lease.policy.is_finalized_eq(&caller, env.number) {
            return Err(KernelError::NotLeaseholder);
        }
        Ok(())
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    /// Claim a deposit hash first-writer-wins.
    pub fn commit_to_deposit(
        &mut self,
        caller: Address,
        signed_tx_hash: B256,
        env: BlockEnv,
    ) -> KernelResult<()> {
        if self.deposit_commits.contains_key(&signed_tx_hash) {
            return Err(KernelError::AlreadySeen);
        }
        self.deposit_commits.insert(
            signed_tx_hash,
            DepositCommitment {
                sub_policy: caller,
                committed_at: env.timestamp,
            },
        );
        Ok(())
    }

    /// Credit a proved foreign-chain deposit to the committing sub-policy.
    ///
    /// Returns the credited value.
    pub fn deposit_funds(
        &mut self,
        caller: Address,
        signed_tx: &[u8],
        proof: &TxInclusionProof,
        oracle: &dyn BlockHashOracle,
        verifier: &dyn ProofVerifier,
    ) -> KernelResult<U256> {
        let signed = tx::decode_signed(signed_tx)?;
        let hash = *signed.hash();

        let commitment = self
            .deposit_commits
            .get(&hash)
            .copied()
            .ok_or(KernelError::NotCommitter)?;
        if commitment.sub_policy != caller {
            return Err(KernelError::NotCommitter);
        }

        let verified = self.verify_inclusion(&signed, proof, oracle, verifier)?;
        // Sanity: the deposit must carry a recoverable signature.
        tx::recover_signer(&signed)?;

        if self.deposit_control.get(&caller).copied().unwrap_or(false)
            && verified.block_timestamp < commitment.committed_at
        {
            return Err(KernelError::DepositPredatesCommitment);
        }

        // The commitment is kept: the seen-set is what makes duplicate
        // submissions fail `AlreadySeen` rather than `NotCommitter`.
        if !self.deposits_seen.insert(hash) {
            return Err(KernelError::AlreadySeen);
        }

        let transaction = signed.tx();
        let account = tx::destination(transaction)?;
        self.ledger
            .credit_eth(caller, account, transaction.chain_id, transaction.value);
        Ok(transaction.value)
    }

    /// Credit local reimbursement collateral (payable).
    pub fn deposit_local_funds(
        &mut self,
        caller: Address,
        account: Address,
        chain_id: u64,
        amount: U256,
        env: BlockEnv,
    ) {
        self.ledger
            .deposit_local(caller, account, chain_id, amount, env.number);
    }

    /// Move matured pending collateral into the finalized balance.
    pub fn finalize_local_funds(
        &mut self,
        caller: Address,
        account: Address,
        chain_id: u64,
        env: BlockEnv,
    ) -> KernelResult<U256> {
        self.ledger
            .finalize_local(caller, account, chain_id, env.number)
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Pin an outgoing transaction's accounting to the caller.
    ///
    /// The supplied nonce is overwritten with the authoritative count, so a
    /// commitment can never pin a stale nonce. Returns the unsigned hash
    /// the commitment is keyed by.
    pub fn commit_to_transaction(
        &mut self,
        caller: Address,
        account: Address,
        mut transaction: TxEip1559,
        env: BlockEnv,
    ) -> KernelResult<B256> {
        let to = tx::destination(&transaction)?;
        let asset = destination_asset(transaction.chain_id, to);
        self.authorize_sub_lease(caller, account, asset, env)?;

        transaction.nonce = self.tx_count(account, transaction.chain_id);
        let unsigned = tx::unsigned_hash(&transaction);
        self.tx_commits.insert(
            commit_key(account, unsigned),
            TxCommitment {
                sub_policy: caller,
                block: env.number,
            },
        );
        Ok(unsigned)
    }

    /// Evaluate the five ordered signing pre-conditions and return the
    /// unsigned payload for the registry's signing gate.
    ///
    /// The nonce is not advanced here; only an inclusion proof advances it.
    pub fn authorize_sign(
        &self,
        caller: Address,
        account: Address,
        transaction: &TxEip1559,
        env: BlockEnv,
    ) -> KernelResult<Vec<u8>> {
        let to = tx::destination(transaction)?;
        let chain_id = transaction.chain_id;
        let asset = destination_asset(chain_id, to);

        // 1. The eventual inclusion proof must already be funded.
        let proof_cost = cost::estimate_inclusion_proof_cost(transaction.input.len());
        let collateral = self.ledger.local_finalized(caller, account, chain_id);
        if proof_cost > collateral {
            return Err(KernelError::InsufficientBalance {
                required: proof_cost,
                available: collateral,
            });
        }

        // 2. Without unlimited-signer standing, a strictly-earlier-block
        //    commitment by the caller must pin this exact transaction.
        let unlimited = self.last_unlimited.get(&lease_key(account, asset)).copied();
        if unlimited != Some(caller) {
            let commitment = self
                .tx_commits
                .get(&commit_key(account, tx::unsigned_hash(transaction)))
                .copied()
                .ok_or(KernelError::CommitmentRequired)?;
            if commitment.sub_policy != caller {
                return Err(KernelError::CommitmentRequired);
            }
            if commitment.block >= env.number {
                return Err(KernelError::CommitmentTooEarly);
            }
        }

        // 3. Current, finalized, unexpired leaseholder.
        self.authorize_sub_lease(caller, account, asset, env)?;

        // 4. Authoritative nonce.
        let expected = self.tx_count(account, chain_id);
        if transaction.nonce != expected {
            return Err(KernelError::BadNonce {
                expected,
                got: transaction.nonce,
            });
        }

        // 5. The sub-policy's balance covers the worst case.
        let required = tx::max_cost(transaction);
        let available = self.ledger.eth_balance(caller, account, chain_id);
        if required > available {
            return Err(KernelError::InsufficientBalance {
                required,
                available,
            });
        }

        Ok(tx::signing_payload(transaction))
    }

    // =========================================================================
    // Inclusion proofs
    // =========================================================================

    /// Account for a proved outbound transaction and reimburse the prover.
    ///
    /// Returns the reimbursement owed to `caller`.
    pub fn prove_transaction_inclusion(
        &mut self,
        caller: Address,
        signed_tx: &[u8],
        proof: &TxInclusionProof,
        oracle: &dyn BlockHashOracle,
        verifier: &dyn ProofVerifier,
        env: BlockEnv,
    ) -> KernelResult<U256> {
        let signed = tx::decode_signed(signed_tx)?;
        self.verify_inclusion(&signed, proof, oracle, verifier)?;
        let signer = tx::recover_signer(&signed)?;

        let transaction = signed.tx();
        let chain_id = transaction.chain_id;
        let to = tx::destination(transaction)?;
        let asset = destination_asset(chain_id, to);

        let expected = self.tx_count(signer, chain_id);
        if transaction.nonce != expected {
            return Err(KernelError::BadNonce {
                expected,
                got: transaction.nonce,
            });
        }
        self.tx_count.insert(nonce_key(signer, chain_id), expected + 1);

        // A consumed commitment is removed whichever branch accounts for
        // the transaction.
        let commitment = self
            .tx_commits
            .remove(&commit_key(signer, tx::unsigned_hash(transaction)));

        // Debit precedence: the unlimited signer while it still holds the
        // lease, else the committed sub-policy, else the recorded
        // unlimited signer. Do not reorder.
        let leaseholder = self.current_leaseholder(signer, asset, env);
        let unlimited = self.last_unlimited.get(&lease_key(signer, asset)).copied();
        let debited = if leaseholder.is_some() && leaseholder == unlimited {
            unlimited
        } else if let Some(commitment) = commitment {
            Some(commitment.sub_policy)
        } else {
            unlimited
        };

        if let Some(sub_policy) = debited {
            self.ledger.debit_eth_saturating(
                sub_policy,
                signer,
                chain_id,
                tx::max_cost(transaction),
            );
            self.included
                .entry(included_key(signer, sub_policy))
                .or_default()
                .push(*signed.hash());
        }

        if let Some(holder) = leaseholder {
            self.last_unlimited.insert(lease_key(signer, asset), holder);
        }

        let payout = match debited {
            Some(sub_policy) => self.ledger.pay_from_local_saturating(
                sub_policy,
                signer,
                chain_id,
                cost::estimate_inclusion_proof_cost(transaction.input.len()),
            ),
            None => U256::ZERO,
        };
        tracing::debug!(
            signer = %signer,
            nonce = expected,
            prover = %caller,
            payout = %payout,
            "inclusion proof accepted"
        );
        Ok(payout)
    }

    /// Check a supplied signed transaction against the oracle-attested
    /// header and the verifier's included-transaction answer.
    fn verify_inclusion(
        &self,
        signed: &alloy::consensus::Signed<TxEip1559>,
        proof: &TxInclusionProof,
        oracle: &dyn BlockHashOracle,
        verifier: &dyn ProofVerifier,
    ) -> KernelResult<crate::oracle::VerifiedInclusion> {
        if signed.tx().chain_id != proof.chain_id {
            return Err(KernelError::ProofMismatch("chain id"));
        }
        let trusted = oracle
            .block_hash(proof.chain_id, proof.block_number)
            .ok_or(KernelError::ProofMismatch("header not attested"))?;
        if keccak256(&proof.header) != trusted {
            return Err(KernelError::ProofMismatch("header hash"));
        }
        let verified = verifier.validate_tx_proof(proof)?;
        if verified.transaction.as_ref() != tx::encode_signed(signed).as_slice() {
            return Err(KernelError::ProofMismatch("included transaction"));
        }
        Ok(verified)
    }
}

impl EncumbrancePolicy for EthereumTxPolicy {
    /// Accept enrollment when the transaction asset is among the leased
    /// assets; record the manager and our lease expiry for the account.
    fn notify_enrollment(&mut self, enrollment: &Enrollment<'_>) -> KernelResult<()> {
        if !enrollment.assets.contains(&transaction_asset()) {
            return Err(KernelError::PolicyRejected(
                "enrollment does not lease the transaction asset".into(),
            ));
        }
        self.accounts.insert(
            enrollment.account,
            ManagedAccount {
                manager: enrollment.manager,
                lease_expiry: enrollment.expiration,
            },
        );
        Ok(())
    }
}
