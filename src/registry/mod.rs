// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encumbered-wallet registry.
//!
//! The registry owns every custodied key and gates every use of it. Keys
//! are generated in-enclave; the access manager never sees the private
//! material. Managers grant time-bounded leases over asset classes to
//! policy principals, and from that point only the leaseholder can obtain
//! signatures on payloads of that class. Ownership transfers, lease
//! installations, and export-request flips are all written through
//! delayed-finalization cells, so none of them is usable in the block that
//! produced it.
//!
//! ## Storage Layout
//!
//! - `wallets`: wallet address → full record (keypair, manager cell,
//!   export state)
//! - `ownership`: `manager|accountIndex` → wallet address
//! - `attended`: principal → append-only discovery log
//! - `leases`: `walletAddress|assetTag` → lease
//!
//! All composite keys are deterministic hex strings.

pub mod wallet;

use std::collections::HashMap;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::assets::{self, TypedDomain};
use crate::cell::DelayedCell;
use crate::config::{DESTROYED_KEY_FILL, EXPORT_TAG_PREFIX};
use crate::envelope::{self, SealedEnvelope};
use crate::error::{KernelError, KernelResult};
use crate::host::{crypto, BlockEnv};

pub use wallet::{AttendedWallet, ExportState, Lease, Wallet};

/// Composite key for the ownership map.
fn owner_key(manager: Address, account_index: U256) -> String {
    format!("{manager}|{account_index:#x}")
}

/// Composite key for the lease map.
fn lease_key(wallet: Address, asset: B256) -> String {
    format!("{wallet}|{asset}")
}

/// The wallet registry (component owning all key custody).
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletRegistry {
    /// Static X25519 secret for the key-export envelope.
    export_secret: [u8; 32],
    /// Matching public key, handed to counterparties out of band.
    export_public: [u8; 32],
    wallets: HashMap<Address, Wallet>,
    ownership: HashMap<String, Address>,
    attended: HashMap<Address, Vec<AttendedWallet>>,
    leases: HashMap<String, Lease>,
}

impl WalletRegistry {
    pub fn new(rng: &mut StdRng) -> Self {
        let (export_secret, export_public) = envelope::generate_keypair(rng);
        Self {
            export_secret,
            export_public,
            wallets: HashMap::new(),
            ownership: HashMap::new(),
            attended: HashMap::new(),
            leases: HashMap::new(),
        }
    }

    /// The registry's static X25519 export public key. Counterparties
    /// encrypt the export tag to this key.
    pub fn export_public_key(&self) -> [u8; 32] {
        self.export_public
    }

    // =========================================================================
    // Wallet lifecycle
    // =========================================================================

    /// Generate a fresh wallet under `(caller, account_index)`.
    ///
    /// Idempotent: returns `false` without touching state when the link
    /// already exists.
    pub fn create_wallet(
        &mut self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
        rng: &mut StdRng,
    ) -> KernelResult<bool> {
        let key = owner_key(caller, account_index);
        if self.ownership.contains_key(&key) {
            return Ok(false);
        }

        let pair = crypto::generate_keypair(rng);
        let address = crypto::eth_address(&pair.public)?;
        let record = Wallet {
            public_key: Bytes::from(pair.public),
            secret: pair.secret,
            address,
            // Creation is birth, not an ownership change: the manager cell
            // starts settled so the creator can enroll policies in the
            // creation block.
            manager: DelayedCell::settled(caller),
            account_index,
            max_lease_expiry: None,
            export: ExportState::default(),
        };
        self.wallets.insert(address, record);
        self.ownership.insert(key, address);
        self.attended.entry(caller).or_default().push(AttendedWallet {
            account_index,
            created_block: env.number,
        });
        Ok(true)
    }

    /// The caller's wallet under `account_index`, with finalized ownership.
    fn owned_wallet(
        &self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
    ) -> KernelResult<&Wallet> {
        let address = self
            .ownership
            .get(&owner_key(caller, account_index))
            .ok_or(KernelError::WalletNotFound)?;
        let wallet = self
            .wallets
            .get(address)
            .ok_or(KernelError::WalletNotFound)?;
        if *wallet.manager.finalized(env.number)? != caller {
            return Err(KernelError::NotAuthorized);
        }
        Ok(wallet)
    }

    fn owned_wallet_mut(
        &mut self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
    ) -> KernelResult<&mut Wallet> {
        let address = *self
            .ownership
            .get(&owner_key(caller, account_index))
            .ok_or(KernelError::WalletNotFound)?;
        let wallet = self
            .wallets
            .get_mut(&address)
            .ok_or(KernelError::WalletNotFound)?;
        if *wallet.manager.finalized(env.number)? != caller {
            return Err(KernelError::NotAuthorized);
        }
        Ok(wallet)
    }

    /// Uncompressed public key of the caller's wallet.
    pub fn get_public_key(
        &self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
    ) -> KernelResult<Bytes> {
        Ok(self.owned_wallet(caller, account_index, env)?.public_key.clone())
    }

    /// Externally visible address of the caller's wallet.
    pub fn get_address(
        &self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
    ) -> KernelResult<Address> {
        Ok(self.owned_wallet(caller, account_index, env)?.address)
    }

    /// Hand the wallet to `new_owner` under a fresh random index.
    ///
    /// The manager cell is rewritten at the current block, so neither the
    /// old nor the new manager can use the wallet until the next block.
    /// Returns the index chosen for the recipient.
    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        account_index: U256,
        new_owner: Address,
        env: BlockEnv,
        rng: &mut StdRng,
    ) -> KernelResult<U256> {
        if new_owner == Address::ZERO {
            return Err(KernelError::InvalidPayload(
                "new owner must not be the zero address".into(),
            ));
        }

        let address = {
            let wallet = self.owned_wallet(caller, account_index, env)?;
            if wallet.export.requested_at_all() {
                return Err(KernelError::Exported);
            }
            wallet.address
        };

        // A colliding fresh index would silently orphan the recipient's
        // existing wallet; re-draw instead.
        let new_index = loop {
            let candidate = U256::from_be_bytes(rng.gen::<[u8; 32]>());
            if !self.ownership.contains_key(&owner_key(new_owner, candidate)) {
                break candidate;
            }
        };

        let wallet = self
            .wallets
            .get_mut(&address)
            .ok_or(KernelError::WalletNotFound)?;
        wallet.manager.update_to(new_owner, env.number)?;
        wallet.account_index = new_index;

        self.ownership.remove(&owner_key(caller, account_index));
        self.ownership
            .insert(owner_key(new_owner, new_index), address);
        self.attended
            .entry(new_owner)
            .or_default()
            .push(AttendedWallet {
                account_index: new_index,
                created_block: env.number,
            });
        Ok(new_index)
    }

    /// The append-only discovery log for a principal.
    pub fn attended_wallets(&self, principal: Address) -> &[AttendedWallet] {
        self.attended
            .get(&principal)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // =========================================================================
    // Encumbrance
    // =========================================================================

    /// Install leases for `policy` over `assets` on the caller's wallet.
    ///
    /// Returns the wallet address; the dispatcher delivers the enrollment
    /// notification (and unwinds this installation if the policy vetoes).
    pub fn enter_encumbrance(
        &mut self,
        caller: Address,
        account_index: U256,
        assets: &[B256],
        policy: Address,
        expiry: DateTime<Utc>,
        env: BlockEnv,
    ) -> KernelResult<Address> {
        if expiry <= env.timestamp {
            return Err(KernelError::Expired { expired_at: expiry });
        }
        if policy == Address::ZERO {
            return Err(KernelError::InvalidPayload(
                "policy must not be the zero address".into(),
            ));
        }

        let address = {
            let wallet = self.owned_wallet(caller, account_index, env)?;
            if wallet.export.requested_at_all() {
                return Err(KernelError::Exported);
            }
            wallet.address
        };

        for asset in assets {
            if *asset == B256::ZERO {
                return Err(KernelError::AssetUnknown);
            }
            if let Some(prior) = self.leases.get(&lease_key(address, *asset)) {
                // A new lease is granted only when the prior expiry is
                // strictly in the past.
                if prior.expiry >= env.timestamp {
                    return Err(KernelError::AlreadyEncumbered);
                }
            }
        }

        for asset in assets {
            self.leases.insert(
                lease_key(address, *asset),
                Lease {
                    policy: DelayedCell::written(policy, env.number),
                    expiry,
                },
            );
        }

        let wallet = self
            .wallets
            .get_mut(&address)
            .ok_or(KernelError::WalletNotFound)?;
        wallet.max_lease_expiry = Some(match wallet.max_lease_expiry {
            Some(current) => current.max(expiry),
            None => expiry,
        });
        Ok(address)
    }

    /// The lease on `(wallet, asset)`, if any.
    pub fn lease(&self, wallet: Address, asset: B256) -> Option<&Lease> {
        self.leases.get(&lease_key(wallet, asset))
    }

    // =========================================================================
    // Signing gate
    // =========================================================================

    /// Authorize `caller` against the lease for `asset` on `wallet`.
    fn authorize_lease(
        &self,
        caller: Address,
        wallet: Address,
        asset: B256,
        env: BlockEnv,
    ) -> KernelResult<()> {
        let lease = self
            .leases
            .get(&lease_key(wallet, asset))
            .ok_or(KernelError::NotAuthorized)?;
        if lease.expiry <= env.timestamp {
            return Err(KernelError::Expired {
                expired_at: lease.expiry,
            });
        }
        // False both for a pending cell and for a different leaseholder.
        if !lease.policy.is_finalized_eq(&caller, env.number) {
            return Err(KernelError::NotAuthorized);
        }
        Ok(())
    }

    fn signable_wallet(&self, wallet: Address, env: BlockEnv) -> KernelResult<&Wallet> {
        let record = self
            .wallets
            .get(&wallet)
            .ok_or(KernelError::WalletNotFound)?;
        if record.export.destroyed || record.export.is_exported(env.number) {
            return Err(KernelError::Exported);
        }
        Ok(record)
    }

    /// Sign `Keccak-256(payload)` with the wallet's key, gated by the
    /// lease covering the payload's asset. Returns a DER signature.
    pub fn sign_message(
        &self,
        caller: Address,
        wallet: Address,
        payload: &[u8],
        env: BlockEnv,
    ) -> KernelResult<Vec<u8>> {
        let record = self.signable_wallet(wallet, env)?;
        let asset = assets::classify(payload);
        if asset == B256::ZERO {
            return Err(KernelError::AssetUnknown);
        }
        self.authorize_lease(caller, wallet, asset, env)?;
        crypto::sign_prehashed(&record.secret, keccak256(payload))
    }

    /// Sign an EIP-712 digest. The asset is discriminated by the domain
    /// name alone; authorization and freshness checks are identical to
    /// [`WalletRegistry::sign_message`].
    pub fn sign_typed_data(
        &self,
        caller: Address,
        wallet: Address,
        domain: &TypedDomain,
        type_string: &str,
        encoded_data: &[u8],
        env: BlockEnv,
    ) -> KernelResult<Vec<u8>> {
        let record = self.signable_wallet(wallet, env)?;
        let asset = domain.asset()?;
        self.authorize_lease(caller, wallet, asset, env)?;
        let digest = assets::typed_data_digest(domain, type_string, encoded_data);
        crypto::sign_prehashed(&record.secret, digest)
    }

    // =========================================================================
    // Key export
    // =========================================================================

    /// The ABI tuple `("Key export", walletAddress)` a counterparty must
    /// encrypt to the registry's export key.
    pub fn export_tag(wallet: Address) -> Vec<u8> {
        let prefix = EXPORT_TAG_PREFIX.as_bytes();
        let mut out = Vec::with_capacity(128);
        // Tuple head: offset of the dynamic string, then the address word.
        out.extend_from_slice(&U256::from(0x40u64).to_be_bytes::<32>());
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(wallet.as_slice());
        // Tail: string length, then the padded bytes.
        out.extend_from_slice(&U256::from(prefix.len()).to_be_bytes::<32>());
        let mut padded = [0u8; 32];
        padded[..prefix.len()].copy_from_slice(prefix);
        out.extend_from_slice(&padded);
        out
    }

    /// Begin a key export.
    ///
    /// Allowed only once every lease ever granted has expired and no export
    /// was previously requested. The counterparty proves control of its
    /// X25519 secret by encrypting the export tag to the registry's static
    /// key; the flag flips through a delayed cell, so the export itself is
    /// possible only from the next block.
    pub fn request_key_export(
        &mut self,
        caller: Address,
        account_index: U256,
        counterparty: [u8; 32],
        tag_ciphertext: &[u8],
        tag_nonce: [u8; 32],
        env: BlockEnv,
    ) -> KernelResult<()> {
        let expected = {
            let wallet = self.owned_wallet(caller, account_index, env)?;
            if wallet.export.requested_at_all() || wallet.export.destroyed {
                return Err(KernelError::Exported);
            }
            if let Some(max_expiry) = wallet.max_lease_expiry {
                if max_expiry >= env.timestamp {
                    return Err(KernelError::AlreadyEncumbered);
                }
            }
            Self::export_tag(wallet.address)
        };

        let opened = envelope::open(
            &self.export_secret,
            &counterparty,
            &tag_nonce,
            tag_ciphertext,
            b"",
        )
        .map_err(|_| KernelError::WrongExportTag)?;
        if opened != expected {
            return Err(KernelError::WrongExportTag);
        }

        let wallet = self.owned_wallet_mut(caller, account_index, env)?;
        wallet.export.requested.update_to(true, env.number)?;
        wallet.export.counterparty = Some(counterparty);
        Ok(())
    }

    /// Re-encrypt the private key to the recorded counterparty.
    ///
    /// Requires the export flag to be finalized. The envelope's associated
    /// data is the wallet address; the counterparty must supply it when
    /// opening.
    pub fn export_key(
        &self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
        rng: &mut StdRng,
    ) -> KernelResult<SealedEnvelope> {
        let wallet = self.owned_wallet(caller, account_index, env)?;
        if wallet.export.destroyed {
            return Err(KernelError::Exported);
        }
        if !wallet.export.is_exported(env.number) {
            return match wallet.export.requested.finalized(env.number) {
                Err(_) => Err(KernelError::Pending),
                Ok(_) => Err(KernelError::NotAuthorized),
            };
        }
        let counterparty = wallet
            .export
            .counterparty
            .ok_or(KernelError::NotAuthorized)?;
        envelope::seal(
            &self.export_secret,
            &counterparty,
            envelope::fresh_nonce(rng),
            &wallet.secret,
            wallet.address.as_slice(),
        )
    }

    /// Overwrite the private-key slot after a completed export.
    pub fn destroy_exported_key(
        &mut self,
        caller: Address,
        account_index: U256,
        env: BlockEnv,
    ) -> KernelResult<()> {
        let wallet = self.owned_wallet_mut(caller, account_index, env)?;
        if !wallet.export.is_exported(env.number) {
            return match wallet.export.requested.finalized(env.number) {
                Err(_) => Err(KernelError::Pending),
                Ok(_) => Err(KernelError::NotAuthorized),
            };
        }
        wallet.secret = [DESTROYED_KEY_FILL; 32];
        wallet.export.destroyed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::from_seed([9u8; 32])
    }

    fn env(block: u64, secs: i64) -> BlockEnv {
        BlockEnv {
            number: block,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    fn manager() -> Address {
        Address::repeat_byte(0x11)
    }

    fn policy() -> Address {
        Address::repeat_byte(0x22)
    }

    fn signed_message(body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x19, 0x45];
        payload.extend_from_slice(body);
        payload
    }

    fn registry_with_wallet(rng: &mut StdRng) -> (WalletRegistry, Address) {
        let mut registry = WalletRegistry::new(rng);
        assert!(registry
            .create_wallet(manager(), U256::ZERO, env(1, 10), rng)
            .unwrap());
        let address = registry
            .get_address(manager(), U256::ZERO, env(1, 10))
            .unwrap();
        (registry, address)
    }

    #[test]
    fn create_wallet_is_idempotent_per_index() {
        let mut rng = rng();
        let mut registry = WalletRegistry::new(&mut rng);
        assert!(registry
            .create_wallet(manager(), U256::ZERO, env(1, 10), &mut rng)
            .unwrap());
        assert!(!registry
            .create_wallet(manager(), U256::ZERO, env(1, 10), &mut rng)
            .unwrap());
        assert_eq!(registry.attended_wallets(manager()).len(), 1);
    }

    #[test]
    fn address_matches_public_key_derivation() {
        let mut rng = rng();
        let (registry, address) = registry_with_wallet(&mut rng);
        let pk = registry
            .get_public_key(manager(), U256::ZERO, env(1, 10))
            .unwrap();
        assert_eq!(crypto::eth_address(&pk).unwrap(), address);
    }

    #[test]
    fn transfer_blocks_both_parties_within_its_block() {
        let mut rng = rng();
        let (mut registry, _) = registry_with_wallet(&mut rng);
        let new_owner = Address::repeat_byte(0x33);

        let new_index = registry
            .transfer_ownership(manager(), U256::ZERO, new_owner, env(5, 50), &mut rng)
            .unwrap();

        // Old link is gone.
        assert!(matches!(
            registry.get_address(manager(), U256::ZERO, env(5, 50)),
            Err(KernelError::WalletNotFound)
        ));
        // New link exists but the manager cell is pending this block.
        assert!(matches!(
            registry.get_address(new_owner, new_index, env(5, 50)),
            Err(KernelError::Pending)
        ));
        // Next block the recipient has full rights.
        assert!(registry.get_address(new_owner, new_index, env(6, 60)).is_ok());

        // The recipient can discover the fresh index from the log.
        let log = registry.attended_wallets(new_owner);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].account_index, new_index);
        assert_eq!(log[0].created_block, 5);
    }

    #[test]
    fn enroll_then_sign_round_trip() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);
        let expiry = Utc.timestamp_opt(3_600, 0).unwrap();

        registry
            .enter_encumbrance(
                manager(),
                U256::ZERO,
                &[assets::signed_message_asset()],
                policy(),
                expiry,
                env(1, 10),
            )
            .unwrap();

        let payload = signed_message(b"hello");
        // Leaseholder signs from the next block on.
        let der = registry
            .sign_message(policy(), address, &payload, env(2, 20))
            .unwrap();
        let pk = registry
            .get_public_key(manager(), U256::ZERO, env(2, 20))
            .unwrap();
        assert!(crypto::verify_prehashed(&pk, keccak256(&payload), &der));

        // The manager cannot sign, even while owning the wallet.
        assert!(matches!(
            registry.sign_message(manager(), address, &payload, env(2, 20)),
            Err(KernelError::NotAuthorized)
        ));
    }

    #[test]
    fn same_block_enroll_and_sign_is_blocked() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);
        let expiry = Utc.timestamp_opt(3_600, 0).unwrap();

        registry
            .enter_encumbrance(
                manager(),
                U256::ZERO,
                &[assets::signed_message_asset()],
                policy(),
                expiry,
                env(1, 10),
            )
            .unwrap();

        // Same block: the lease cell is pending.
        assert!(matches!(
            registry.sign_message(policy(), address, &signed_message(b"x"), env(1, 10)),
            Err(KernelError::NotAuthorized)
        ));
    }

    #[test]
    fn overlapping_lease_is_refused_until_expiry_passes() {
        let mut rng = rng();
        let (mut registry, _) = registry_with_wallet(&mut rng);
        let asset = assets::signed_message_asset();
        let expiry = Utc.timestamp_opt(100, 0).unwrap();

        registry
            .enter_encumbrance(manager(), U256::ZERO, &[asset], policy(), expiry, env(1, 10))
            .unwrap();

        let other = Address::repeat_byte(0x44);
        // Still unexpired at t=100 (expiry must be strictly in the past).
        assert!(matches!(
            registry.enter_encumbrance(
                manager(),
                U256::ZERO,
                &[asset],
                other,
                Utc.timestamp_opt(500, 0).unwrap(),
                env(2, 100),
            ),
            Err(KernelError::AlreadyEncumbered)
        ));
        // Strictly past: a new lease may be granted.
        registry
            .enter_encumbrance(
                manager(),
                U256::ZERO,
                &[asset],
                other,
                Utc.timestamp_opt(500, 0).unwrap(),
                env(3, 101),
            )
            .unwrap();
    }

    #[test]
    fn unknown_assets_are_never_signable() {
        let mut rng = rng();
        let (registry, address) = registry_with_wallet(&mut rng);
        assert!(matches!(
            registry.sign_message(manager(), address, &[0x03, 0x01, 0x02], env(2, 20)),
            Err(KernelError::AssetUnknown)
        ));
    }

    #[test]
    fn expired_lease_is_refused() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);
        registry
            .enter_encumbrance(
                manager(),
                U256::ZERO,
                &[assets::signed_message_asset()],
                policy(),
                Utc.timestamp_opt(30, 0).unwrap(),
                env(1, 10),
            )
            .unwrap();
        assert!(matches!(
            registry.sign_message(policy(), address, &signed_message(b"x"), env(2, 30)),
            Err(KernelError::Expired { .. })
        ));
    }

    fn request_export(
        registry: &mut WalletRegistry,
        address: Address,
        rng: &mut StdRng,
        at: BlockEnv,
    ) -> ([u8; 32], [u8; 32]) {
        let (counterparty_sk, counterparty_pk) = envelope::generate_keypair(rng);
        let tag = WalletRegistry::export_tag(address);
        let sealed = envelope::seal(
            &counterparty_sk,
            &registry.export_public_key(),
            envelope::fresh_nonce(rng),
            &tag,
            b"",
        )
        .unwrap();
        registry
            .request_key_export(
                manager(),
                U256::ZERO,
                counterparty_pk,
                &sealed.ciphertext,
                sealed.nonce,
                at,
            )
            .unwrap();
        (counterparty_sk, counterparty_pk)
    }

    #[test]
    fn export_round_trip_recovers_the_signing_key() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);

        let (counterparty_sk, _) = request_export(&mut registry, address, &mut rng, env(5, 50));

        // Same block: the flag is pending.
        assert!(matches!(
            registry.export_key(manager(), U256::ZERO, env(5, 50), &mut rng),
            Err(KernelError::Pending)
        ));

        let sealed = registry
            .export_key(manager(), U256::ZERO, env(6, 60), &mut rng)
            .unwrap();
        let secret = envelope::open(
            &counterparty_sk,
            &registry.export_public_key(),
            &sealed.nonce,
            &sealed.ciphertext,
            address.as_slice(),
        )
        .unwrap();

        // The recovered key reproduces the wallet's recorded address.
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&secret);
        let signing = k256::ecdsa::SigningKey::from_slice(&secret_bytes).unwrap();
        let public = signing.verifying_key().to_encoded_point(false);
        assert_eq!(crypto::eth_address(public.as_bytes()).unwrap(), address);
    }

    #[test]
    fn export_requires_all_leases_expired() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);
        registry
            .enter_encumbrance(
                manager(),
                U256::ZERO,
                &[assets::signed_message_asset()],
                policy(),
                Utc.timestamp_opt(100, 0).unwrap(),
                env(1, 10),
            )
            .unwrap();

        let (counterparty_sk, counterparty_pk) = envelope::generate_keypair(&mut rng);
        let sealed = envelope::seal(
            &counterparty_sk,
            &registry.export_public_key(),
            envelope::fresh_nonce(&mut rng),
            &WalletRegistry::export_tag(address),
            b"",
        )
        .unwrap();
        assert!(matches!(
            registry.request_key_export(
                manager(),
                U256::ZERO,
                counterparty_pk,
                &sealed.ciphertext,
                sealed.nonce,
                env(2, 50),
            ),
            Err(KernelError::AlreadyEncumbered)
        ));
    }

    #[test]
    fn wrong_export_tag_is_rejected() {
        let mut rng = rng();
        let (mut registry, _) = registry_with_wallet(&mut rng);
        let (counterparty_sk, counterparty_pk) = envelope::generate_keypair(&mut rng);
        // Tag bound to the wrong wallet address.
        let sealed = envelope::seal(
            &counterparty_sk,
            &registry.export_public_key(),
            envelope::fresh_nonce(&mut rng),
            &WalletRegistry::export_tag(Address::repeat_byte(0xEE)),
            b"",
        )
        .unwrap();
        assert!(matches!(
            registry.request_key_export(
                manager(),
                U256::ZERO,
                counterparty_pk,
                &sealed.ciphertext,
                sealed.nonce,
                env(2, 50),
            ),
            Err(KernelError::WrongExportTag)
        ));
    }

    #[test]
    fn export_request_freezes_writes() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);
        request_export(&mut registry, address, &mut rng, env(5, 50));

        assert!(matches!(
            registry.transfer_ownership(
                manager(),
                U256::ZERO,
                Address::repeat_byte(0x33),
                env(6, 60),
                &mut rng,
            ),
            Err(KernelError::Exported)
        ));
        assert!(matches!(
            registry.enter_encumbrance(
                manager(),
                U256::ZERO,
                &[assets::signed_message_asset()],
                policy(),
                Utc.timestamp_opt(999, 0).unwrap(),
                env(6, 60),
            ),
            Err(KernelError::Exported)
        ));
    }

    #[test]
    fn destroyed_key_refuses_signing_and_export() {
        let mut rng = rng();
        let (mut registry, address) = registry_with_wallet(&mut rng);
        request_export(&mut registry, address, &mut rng, env(5, 50));
        registry
            .destroy_exported_key(manager(), U256::ZERO, env(6, 60))
            .unwrap();

        assert!(matches!(
            registry.sign_message(policy(), address, &signed_message(b"x"), env(7, 70)),
            Err(KernelError::Exported)
        ));
        assert!(matches!(
            registry.export_key(manager(), U256::ZERO, env(7, 70), &mut rng),
            Err(KernelError::Exported)
        ));
    }

    #[test]
    fn export_tag_is_abi_encoded() {
        let address = Address::repeat_byte(0xAB);
        let tag = WalletRegistry::export_tag(address);
        assert_eq!(tag.len(), 128);
        // Offset word.
        assert_eq!(U256::from_be_slice(&tag[..32]), U256::from(0x40));
        // Address word, left padded.
        assert_eq!(&tag[44..64], address.as_slice());
        // String length and content.
        assert_eq!(U256::from_be_slice(&tag[64..96]), U256::from(10));
        assert_eq!(&tag[96..106], b"Key export");
    }
}
