// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Top-Level Dispatcher
//!
//! The kernel owns the wallet registry, the Ethereum-transaction policy,
//! the policy-callback table, and the block environment. The confidential
//! host dispatches one operation at a time, supplying the caller principal
//! explicitly; the kernel never infers it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           Kernel                              │
//! │  ┌───────────────────────┐  ┌──────────────────────────────┐  │
//! │  │     KernelState       │  │  PolicyTable (callbacks)     │  │
//! │  │  - WalletRegistry     │  │  BlockHashOracle (injected)  │  │
//! │  │  - EthereumTxPolicy   │  │  ProofVerifier   (injected)  │  │
//! │  └───────────────────────┘  │  StdRng          (entropy)   │  │
//! │     cloned per dispatch,    │  KernelStorage   (optional)  │  │
//! │     restored on error       └──────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transactional dispatch
//!
//! Every mutating operation runs against a snapshot boundary: the plain
//! state is cloned before the operation and restored when it fails, so an
//! operation either commits entirely or leaves no trace. External policy
//! callbacks are outside this boundary; a policy owns its own state.
//!
//! After a committed mutation the kernel appends an audit event and
//! rewrites the sealed snapshot. Persistence failures are logged, never
//! surfaced: in-memory state stays authoritative for the process lifetime.

use alloy::consensus::TxEip1559;
use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::assets::TypedDomain;
use crate::envelope::SealedEnvelope;
use crate::error::{KernelError, KernelResult};
use crate::ethtx::{Destination, EthereumTxPolicy, PendingFunds, SubLeaseTerms};
use crate::host::BlockEnv;
use crate::oracle::{BlockHashOracle, ProofVerifier, TxInclusionProof};
use crate::policy::{EncumbrancePolicy, Enrollment, PolicyTable};
use crate::registry::{AttendedWallet, WalletRegistry};
use crate::storage::{AuditEvent, AuditEventType, KernelStorage};

/// The cloneable, serializable portion of the kernel: everything the
/// transactional boundary protects and the sealed snapshot persists.
#[derive(Clone, Serialize, Deserialize)]
pub struct KernelState {
    registry: WalletRegistry,
    eth: EthereumTxPolicy,
}

impl KernelState {
    fn new(rng: &mut StdRng) -> Self {
        Self {
            registry: WalletRegistry::new(rng),
            eth: EthereumTxPolicy::new(),
        }
    }
}

/// The trust kernel.
pub struct Kernel {
    state: KernelState,
    hooks: PolicyTable,
    oracle: Box<dyn BlockHashOracle>,
    verifier: Box<dyn ProofVerifier>,
    rng: StdRng,
    env: BlockEnv,
    storage: Option<KernelStorage>,
}

impl Kernel {
    /// A fresh kernel with no persistence, seeded from host entropy.
    pub fn new(
        oracle: Box<dyn BlockHashOracle>,
        verifier: Box<dyn ProofVerifier>,
        seed: [u8; 32],
    ) -> Self {
        let mut rng = StdRng::from_seed(seed);
        Self {
            state: KernelState::new(&mut rng),
            hooks: PolicyTable::new(),
            oracle,
            verifier,
            rng,
            env: BlockEnv::genesis(DateTime::UNIX_EPOCH),
            storage: None,
        }
    }

    /// A kernel bound to sealed storage: restores the previous snapshot
    /// when one exists, otherwise starts fresh and seals the initial
    /// state.
    pub fn with_storage(
        oracle: Box<dyn BlockHashOracle>,
        verifier: Box<dyn ProofVerifier>,
        seed: [u8; 32],
        storage: KernelStorage,
    ) -> KernelResult<Self> {
        let mut kernel = Self::new(oracle, verifier, seed);
        match storage.load_state::<KernelState>()? {
            Some(state) => kernel.state = state,
            None => storage.persist_state(&kernel.state)?,
        }
        kernel.storage = Some(storage);
        Ok(kernel)
    }

    // =========================================================================
    // Host surface
    // =========================================================================

    /// Advance the block environment. The host calls this between
    /// dispatches; the number may repeat but never decrease.
    pub fn advance_block(&mut self, number: u64, timestamp: DateTime<Utc>) -> KernelResult<()> {
        self.env.advance(number, timestamp)
    }

    pub fn block_env(&self) -> BlockEnv {
        self.env
    }

    /// Register (or replace) an external policy callback.
    pub fn register_policy(
        &mut self,
        principal: Address,
        hook: Box<dyn EncumbrancePolicy>,
    ) -> KernelResult<()> {
        if principal == self.state.eth.principal() {
            return Err(KernelError::InvalidPayload(
                "principal is reserved for the built-in transaction policy".into(),
            ));
        }
        self.hooks.register(principal, hook);
        Ok(())
    }

    /// Principal address of the built-in Ethereum-transaction policy.
    pub fn ethereum_policy_principal(&self) -> Address {
        self.state.eth.principal()
    }

    /// The registry's static X25519 export public key.
    pub fn export_public_key(&self) -> [u8; 32] {
        self.state.registry.export_public_key()
    }

    /// Run `f` against the snapshot boundary.
    fn transactional<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> KernelResult<T>,
    ) -> KernelResult<T> {
        let snapshot = self.state.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.state = snapshot;
                tracing::debug!(code = err.code(), "operation rolled back");
                Err(err)
            }
        }
    }

    /// Seal the committed state and append the audit record.
    fn commit(&self, event: AuditEvent) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = storage.append_audit(&event) {
            tracing::warn!(error = %e, "failed to append audit event");
        }
        if let Err(e) = storage.persist_state(&self.state) {
            tracing::warn!(error = %e, "failed to seal state snapshot");
        }
    }

    fn audit(&self, event_type: AuditEventType, principal: Address) -> AuditEvent {
        AuditEvent::new(event_type, principal, self.env.timestamp, self.env.number)
    }

    // =========================================================================
    // Wallet registry operations
    // =========================================================================

    /// Generate a wallet under `(caller, account_index)`. Idempotent;
    /// returns whether a wallet was created.
    pub fn create_wallet(&mut self, caller: Address, account_index: U256) -> KernelResult<bool> {
        let env = self.env;
        let created = self.transactional(|k| {
            k.state
                .registry
                .create_wallet(caller, account_index, env, &mut k.rng)
        })?;
        if created {
            tracing::info!(principal = %caller, "wallet created");
            self.commit(self.audit(AuditEventType::WalletCreated, caller));
        }
        Ok(created)
    }

    pub fn get_public_key(&self, caller: Address, account_index: U256) -> KernelResult<Bytes> {
        self.state.registry.get_public_key(caller, account_index, self.env)
    }

    pub fn get_address(&self, caller: Address, account_index: U256) -> KernelResult<Address> {
        self.state.registry.get_address(caller, account_index, self.env)
    }

    /// The caller's append-only wallet-discovery log.
    pub fn attended_wallets(&self, principal: Address) -> &[AttendedWallet] {
        self.state.registry.attended_wallets(principal)
    }

    /// Transfer the wallet to `new_owner`; returns the recipient's fresh
    /// account index.
    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        account_index: U256,
        new_owner: Address,
    ) -> KernelResult<U256> {
        let env = self.env;
        let new_index = self.transactional(|k| {
            k.state
                .registry
                .transfer_ownership(caller, account_index, new_owner, env, &mut k.rng)
        })?;
        tracing::info!(from = %caller, to = %new_owner, "ownership transferred");
        self.commit(
            self.audit(AuditEventType::OwnershipTransferred, caller)
                .with_resource(format!("{new_owner}")),
        );
        Ok(new_index)
    }

    /// Lease `assets` of the caller's wallet to `policy` until `expiry`,
    /// notifying the policy synchronously. A veto unwinds the lease.
    pub fn enter_encumbrance(
        &mut self,
        caller: Address,
        account_index: U256,
        assets: &[B256],
        policy: Address,
        expiry: DateTime<Utc>,
        data: &[u8],
    ) -> KernelResult<Address> {
        let env = self.env;
        let account = self.transactional(|k| {
            let account = k.state.registry.enter_encumbrance(
                caller,
                account_index,
                assets,
                policy,
                expiry,
                env,
            )?;
            let enrollment = Enrollment {
                manager: caller,
                account,
                assets,
                expiration: expiry,
                data,
            };
            if policy == k.state.eth.principal() {
                k.state.eth.notify_enrollment(&enrollment)?;
            } else {
                k.hooks.notify(policy, &enrollment)?;
            }
            Ok(account)
        })?;
        tracing::info!(manager = %caller, policy = %policy, account = %account, "encumbrance entered");
        self.commit(
            self.audit(AuditEventType::EncumbranceEntered, caller)
                .with_resource(format!("{account}"))
                .with_details(serde_json::json!({
                    "policy": format!("{policy}"),
                    "assets": assets.len(),
                })),
        );
        Ok(account)
    }

    /// Sign a classified payload with the wallet key, gated by the
    /// caller's lease. Returns a DER signature.
    pub fn sign_message(
        &mut self,
        caller: Address,
        account: Address,
        payload: &[u8],
    ) -> KernelResult<Vec<u8>> {
        let signature = self
            .state
            .registry
            .sign_message(caller, account, payload, self.env)?;
        self.commit(
            self.audit(AuditEventType::MessageSigned, caller)
                .with_resource(format!("{account}")),
        );
        Ok(signature)
    }

    /// Sign an EIP-712 digest, gated by the lease on the domain-name
    /// asset. Returns a DER signature.
    pub fn sign_typed_data(
        &mut self,
        caller: Address,
        account: Address,
        domain: &TypedDomain,
        type_string: &str,
        encoded_data: &[u8],
    ) -> KernelResult<Vec<u8>> {
        let signature = self.state.registry.sign_typed_data(
            caller,
            account,
            domain,
            type_string,
            encoded_data,
            self.env,
        )?;
        self.commit(
            self.audit(AuditEventType::TypedDataSigned, caller)
                .with_resource(format!("{account}")),
        );
        Ok(signature)
    }

    /// Begin a key export toward a proven counterparty.
    pub fn request_key_export(
        &mut self,
        caller: Address,
        account_index: U256,
        counterparty: [u8; 32],
        tag_ciphertext: &[u8],
        tag_nonce: [u8; 32],
    ) -> KernelResult<()> {
        let env = self.env;
        self.transactional(|k| {
            k.state.registry.request_key_export(
                caller,
                account_index,
                counterparty,
                tag_ciphertext,
                tag_nonce,
                env,
            )
        })?;
        tracing::info!(principal = %caller, "key export requested");
        self.commit(self.audit(AuditEventType::KeyExportRequested, caller));
        Ok(())
    }

    /// Re-encrypt the private key to the export counterparty.
    pub fn export_key(
        &mut self,
        caller: Address,
        account_index: U256,
    ) -> KernelResult<SealedEnvelope> {
        let env = self.env;
        let sealed = self
            .state
            .registry
            .export_key(caller, account_index, env, &mut self.rng)?;
        tracing::info!(principal = %caller, "key exported");
        self.commit(self.audit(AuditEventType::KeyExported, caller));
        Ok(sealed)
    }

    /// Overwrite the exported private key.
    pub fn destroy_exported_key(
        &mut self,
        caller: Address,
        account_index: U256,
    ) -> KernelResult<()> {
        let env = self.env;
        self.transactional(|k| {
            k.state
                .registry
                .destroy_exported_key(caller, account_index, env)
        })?;
        tracing::info!(principal = %caller, "exported key destroyed");
        self.commit(self.audit(AuditEventType::KeyDestroyed, caller));
        Ok(())
    }

    // =========================================================================
    // Ethereum-transaction policy operations
    // =========================================================================

    /// Sub-lease `(chainId, destination)` assets of `account` to
    /// `sub_policy`, notifying it synchronously.
    pub fn enter_sub_lease(
        &mut self,
        caller: Address,
        account: Address,
        destinations: &[Destination],
        sub_policy: Address,
        expiry: DateTime<Utc>,
        terms: SubLeaseTerms,
        data: &[u8],
    ) -> KernelResult<()> {
        let env = self.env;
        self.transactional(|k| {
            let assets = k.state.eth.enter_sub_lease(
                caller,
                account,
                destinations,
                sub_policy,
                expiry,
                terms,
                env,
            )?;
            let enrollment = Enrollment {
                manager: caller,
                account,
                assets: &assets,
                expiration: expiry,
                data,
            };
            k.hooks.notify(sub_policy, &enrollment)
        })?;
        tracing::info!(manager = %caller, sub_policy = %sub_policy, account = %account, "sub-lease entered");
        self.commit(
            self.audit(AuditEventType::SubLeaseEntered, caller)
                .with_resource(format!("{account}"))
                .with_details(serde_json::json!({
                    "sub_policy": format!("{sub_policy}"),
                    "destinations": destinations.len(),
                })),
        );
        Ok(())
    }

    /// Manager-only: record the current leaseholder as the unlimited
    /// signer for `destination_asset`, clearing the commitment obligation.
    pub fn release_commitment_requirement(
        &mut self,
        caller: Address,
        account: Address,
        destination_asset: B256,
    ) -> KernelResult<()> {
        let env = self.env;
        self.transactional(|k| {
            k.state
                .eth
                .release_commitment_requirement(caller, account, destination_asset, env)
        })?;
        self.commit(
            self.audit(AuditEventType::CommitmentRequirementReleased, caller)
                .with_resource(format!("{account}")),
        );
        Ok(())
    }

    /// Claim a foreign-chain deposit hash, first-writer-wins.
    pub fn commit_to_deposit(&mut self, caller: Address, signed_tx_hash: B256) -> KernelResult<()> {
        let env = self.env;
        self.transactional(|k| k.state.eth.commit_to_deposit(caller, signed_tx_hash, env))?;
        self.commit(
            self.audit(AuditEventType::DepositCommitted, caller)
                .with_resource(format!("{signed_tx_hash}")),
        );
        Ok(())
    }

    /// Prove a committed deposit landed; credits the caller's sub-balance.
    /// Returns the credited value.
    pub fn deposit_funds(
        &mut self,
        caller: Address,
        signed_tx: &[u8],
        proof: &TxInclusionProof,
    ) -> KernelResult<U256> {
        let credited = self.transactional(|k| {
            k.state.eth.deposit_funds(
                caller,
                signed_tx,
                proof,
                k.oracle.as_ref(),
                k.verifier.as_ref(),
            )
        })?;
        self.commit(
            self.audit(AuditEventType::DepositProved, caller)
                .with_details(serde_json::json!({ "value": credited.to_string() })),
        );
        Ok(credited)
    }

    /// Post local reimbursement collateral (payable: `amount` is the
    /// attached value).
    pub fn deposit_local_funds(
        &mut self,
        caller: Address,
        account: Address,
        chain_id: u64,
        amount: U256,
    ) -> KernelResult<()> {
        let env = self.env;
        self.transactional(|k| {
            k.state
                .eth
                .deposit_local_funds(caller, account, chain_id, amount, env);
            Ok(())
        })?;
        self.commit(
            self.audit(AuditEventType::LocalFundsDeposited, caller)
                .with_resource(format!("{account}")),
        );
        Ok(())
    }

    /// Move matured pending collateral into the finalized balance.
    pub fn finalize_local_funds(
        &mut self,
        caller: Address,
        account: Address,
        chain_id: u64,
    ) -> KernelResult<U256> {
        let env = self.env;
        let amount = self.transactional(|k| {
            k.state
                .eth
                .finalize_local_funds(caller, account, chain_id, env)
        })?;
        self.commit(
            self.audit(AuditEventType::LocalFundsFinalized, caller)
                .with_resource(format!("{account}")),
        );
        Ok(amount)
    }

    /// Pin an outgoing transaction to the caller at the authoritative
    /// nonce. Returns the unsigned hash the commitment is keyed by.
    pub fn commit_to_transaction(
        &mut self,
        caller: Address,
        account: Address,
        transaction: TxEip1559,
    ) -> KernelResult<B256> {
        let env = self.env;
        let unsigned = self.transactional(|k| {
            k.state
                .eth
                .commit_to_transaction(caller, account, transaction, env)
        })?;
        self.commit(
            self.audit(AuditEventType::TransactionCommitted, caller)
                .with_resource(format!("{unsigned}")),
        );
        Ok(unsigned)
    }

    /// Sign an outgoing transaction once all five policy pre-conditions
    /// hold. The nonce advances only on inclusion proof, never here.
    /// Returns a DER signature.
    pub fn sign_transaction(
        &mut self,
        caller: Address,
        account: Address,
        transaction: &TxEip1559,
    ) -> KernelResult<Vec<u8>> {
        let env = self.env;
        let payload = self
            .state
            .eth
            .authorize_sign(caller, account, transaction, env)?;
        let policy_principal = self.state.eth.principal();
        let signature = self
            .state
            .registry
            .sign_message(policy_principal, account, &payload, env)?;
        self.commit(
            self.audit(AuditEventType::TransactionSigned, caller)
                .with_resource(format!("{account}")),
        );
        Ok(signature)
    }

    /// Account for a proved outbound transaction: advances the nonce,
    /// debits the responsible sub-policy, and reimburses the caller from
    /// that sub-policy's collateral. Returns the reimbursement.
    pub fn prove_transaction_inclusion(
        &mut self,
        caller: Address,
        signed_tx: &[u8],
        proof: &TxInclusionProof,
    ) -> KernelResult<U256> {
        let payout = self.transactional(|k| {
            k.state.eth.prove_transaction_inclusion(
                caller,
                signed_tx,
                proof,
                k.oracle.as_ref(),
                k.verifier.as_ref(),
                k.env,
            )
        })?;
        self.commit(
            self.audit(AuditEventType::InclusionProved, caller)
                .with_details(serde_json::json!({ "payout": payout.to_string() })),
        );
        Ok(payout)
    }

    // =========================================================================
    // Policy read surface
    // =========================================================================

    pub fn eth_balance(&self, sub_policy: Address, account: Address, chain_id: u64) -> U256 {
        self.state.eth.eth_balance(sub_policy, account, chain_id)
    }

    pub fn local_balance_finalized(
        &self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
    ) -> U256 {
        self.state
            .eth
            .local_balance_finalized(sub_policy, account, chain_id)
    }

    pub fn local_balance_pending(
        &self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
    ) -> Option<PendingFunds> {
        self.state
            .eth
            .local_balance_pending(sub_policy, account, chain_id)
    }

    /// The next nonce the policy will sign for `(account, chain)`.
    pub fn tx_count(&self, account: Address, chain_id: u64) -> u64 {
        self.state.eth.tx_count(account, chain_id)
    }

    pub fn included_transactions(&self, signer: Address, sub_policy: Address) -> &[B256] {
        self.state.eth.included_transactions(signer, sub_policy)
    }

    /// Total ETH attributed for `(account, chain)` across sub-policies.
    pub fn eth_total(&self, account: Address, chain_id: u64) -> U256 {
        self.state.eth.eth_total(account, chain_id)
    }

    /// Recent audit events for a principal, newest first. Empty without
    /// attached storage.
    pub fn recent_events(
        &self,
        principal: Address,
        limit: usize,
    ) -> KernelResult<Vec<AuditEvent>> {
        match &self.storage {
            Some(storage) => Ok(storage.recent_events(principal, limit)?),
            None => Ok(Vec::new()),
        }
    }
}
