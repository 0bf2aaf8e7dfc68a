// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-sub-policy value ledgers.
//!
//! Two ledgers, both keyed `subPolicy|account|chainId`:
//!
//! - **ETH sub-balances**: foreign-chain value attributed to a sub-policy,
//!   credited by proved deposits and debited (saturating) by proved
//!   outbound transactions. Partitioning value per sub-policy is what
//!   keeps one tenant from spending another's deposits.
//! - **Local collateral**: TEE-native funds a sub-policy posts to cover
//!   inclusion-proof reimbursements, with a pending/finalized split so a
//!   same-block top-up cannot be observed by the payout path.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Composite ledger key.
fn funds_key(sub_policy: Address, account: Address, chain_id: u64) -> String {
    format!("{sub_policy}|{account}|{chain_id}")
}

/// Collateral deposited but not yet usable: usable one block after the
/// deposit block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFunds {
    pub amount: U256,
    pub block: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubBalanceLedger {
    eth: HashMap<String, U256>,
    local_finalized: HashMap<String, U256>,
    local_pending: HashMap<String, PendingFunds>,
}

impl SubBalanceLedger {
    // =========================================================================
    // ETH sub-balances
    // =========================================================================

    pub fn eth_balance(&self, sub_policy: Address, account: Address, chain_id: u64) -> U256 {
        self.eth
            .get(&funds_key(sub_policy, account, chain_id))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn credit_eth(
        &mut self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
        amount: U256,
    ) {
        let entry = self
            .eth
            .entry(funds_key(sub_policy, account, chain_id))
            .or_insert(U256::ZERO);
        *entry = entry.saturating_add(amount);
    }

    /// Debit up to `amount`, saturating at zero. Returns what was actually
    /// debited.
    pub fn debit_eth_saturating(
        &mut self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
        amount: U256,
    ) -> U256 {
        let entry = self
            .eth
            .entry(funds_key(sub_policy, account, chain_id))
            .or_insert(U256::ZERO);
        let debited = amount.min(*entry);
        *entry -= debited;
        debited
    }

    /// Total ETH attributed across all sub-policies for `(account, chain)`.
    pub fn eth_total(&self, account: Address, chain_id: u64) -> U256 {
        let suffix = format!("|{account}|{chain_id}");
        self.eth
            .iter()
            .filter(|(key, _)| key.ends_with(&suffix))
            .fold(U256::ZERO, |acc, (_, v)| acc.saturating_add(*v))
    }

    // =========================================================================
    // Local collateral
    // =========================================================================

    pub fn local_finalized(&self, sub_policy: Address, account: Address, chain_id: u64) -> U256 {
        self.local_finalized
            .get(&funds_key(sub_policy, account, chain_id))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn local_pending(
        &self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
    ) -> Option<PendingFunds> {
        self.local_pending
            .get(&funds_key(sub_policy, account, chain_id))
            .copied()
    }

    /// Record a collateral deposit at `block`.
    ///
    /// A pending amount from the same block accumulates; a pending amount
    /// from a strictly older block is finalized first, then a new pending
    /// entry begins.
    pub fn deposit_local(
        &mut self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
        amount: U256,
        block: u64,
    ) {
        let key = funds_key(sub_policy, account, chain_id);
        match self.local_pending.get_mut(&key) {
            Some(pending) if pending.block == block => {
                pending.amount = pending.amount.saturating_add(amount);
            }
            Some(pending) => {
                let matured = pending.amount;
                *pending = PendingFunds { amount, block };
                let finalized = self.local_finalized.entry(key).or_insert(U256::ZERO);
                *finalized = finalized.saturating_add(matured);
            }
            None => {
                self.local_pending.insert(key, PendingFunds { amount, block });
            }
        }
    }

    /// Move a matured pending amount into the finalized balance.
    ///
    /// Refuses while the pending entry is from the current block.
    pub fn finalize_local(
        &mut self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
        block: u64,
    ) -> KernelResult<U256> {
        let key = funds_key(sub_policy, account, chain_id);
        match self.local_pending.get(&key) {
            Some(pending) if pending.block < block => {
                let amount = pending.amount;
                self.local_pending.remove(&key);
                let finalized = self.local_finalized.entry(key).or_insert(U256::ZERO);
                *finalized = finalized.saturating_add(amount);
                Ok(amount)
            }
            _ => Err(KernelError::Pending),
        }
    }

    /// Pay out up to `amount` from finalized collateral, saturating at
    /// zero. Returns what was actually paid.
    pub fn pay_from_local_saturating(
        &mut self,
        sub_policy: Address,
        account: Address,
        chain_id: u64,
        amount: U256,
    ) -> U256 {
        let entry = self
            .local_finalized
            .entry(funds_key(sub_policy, account, chain_id))
            .or_insert(U256::ZERO);
        let paid = amount.min(*entry);
        *entry -= paid;
        paid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sub() -> Address {
        Address::repeat_byte(1)
    }

    fn acct() -> Address {
        Address::repeat_byte(2)
    }

    #[test]
    fn eth_balances_are_isolated_per_sub_policy() {
        let mut ledger = SubBalanceLedger::default();
        ledger.credit_eth(sub(), acct(), 1, U256::from(100));
        let other = Address::repeat_byte(3);
        assert_eq!(ledger.eth_balance(sub(), acct(), 1), U256::from(100));
        assert_eq!(ledger.eth_balance(other, acct(), 1), U256::ZERO);
        assert_eq!(ledger.eth_balance(sub(), acct(), 2), U256::ZERO);
    }

    #[test]
    fn debit_saturates_at_zero() {
        let mut ledger = SubBalanceLedger::default();
        ledger.credit_eth(sub(), acct(), 1, U256::from(30));
        let debited = ledger.debit_eth_saturating(sub(), acct(), 1, U256::from(100));
        assert_eq!(debited, U256::from(30));
        assert_eq!(ledger.eth_balance(sub(), acct(), 1), U256::ZERO);
    }

    #[test]
    fn same_block_local_deposits_accumulate() {
        let mut ledger = SubBalanceLedger::default();
        ledger.deposit_local(sub(), acct(), 1, U256::from(10), 5);
        ledger.deposit_local(sub(), acct(), 1, U256::from(7), 5);
        assert_eq!(
            ledger.local_pending(sub(), acct(), 1),
            Some(PendingFunds {
                amount: U256::from(17),
                block: 5
            })
        );
        assert_eq!(ledger.local_finalized(sub(), acct(), 1), U256::ZERO);
    }

    #[test]
    fn later_block_deposit_finalizes_the_older_pending() {
        let mut ledger = SubBalanceLedger::default();
        ledger.deposit_local(sub(), acct(), 1, U256::from(10), 5);
        ledger.deposit_local(sub(), acct(), 1, U256::from(7), 6);
        assert_eq!(ledger.local_finalized(sub(), acct(), 1), U256::from(10));
        assert_eq!(
            ledger.local_pending(sub(), acct(), 1),
            Some(PendingFunds {
                amount: U256::from(7),
                block: 6
            })
        );
    }

    #[test]
    fn finalize_refuses_same_block() {
        let mut ledger = SubBalanceLedger::default();
        ledger.deposit_local(sub(), acct(), 1, U256::from(10), 5);
        assert!(matches!(
            ledger.finalize_local(sub(), acct(), 1, 5),
            Err(KernelError::Pending)
        ));
        assert_eq!(
            ledger.finalize_local(sub(), acct(), 1, 6).unwrap(),
            U256::from(10)
        );
        // Nothing pending afterwards.
        assert!(matches!(
            ledger.finalize_local(sub(), acct(), 1, 7),
            Err(KernelError::Pending)
        ));
    }

    #[test]
    fn payout_saturates_to_zero() {
        let mut ledger = SubBalanceLedger::default();
        ledger.deposit_local(sub(), acct(), 1, U256::from(10), 5);
        ledger.finalize_local(sub(), acct(), 1, 6).unwrap();
        assert_eq!(
            ledger.pay_from_local_saturating(sub(), acct(), 1, U256::from(25)),
            U256::from(10)
        );
        assert_eq!(ledger.local_finalized(sub(), acct(), 1), U256::ZERO);
    }

    proptest! {
        // Credits minus saturating debits never drive a balance negative,
        // and the total matches the per-key sum.
        #[test]
        fn eth_balance_never_negative(ops in proptest::collection::vec((any::<bool>(), 0u64..1000), 1..50)) {
            let mut ledger = SubBalanceLedger::default();
            for (credit, amount) in ops {
                if credit {
                    ledger.credit_eth(sub(), acct(), 1, U256::from(amount));
                } else {
                    ledger.debit_eth_saturating(sub(), acct(), 1, U256::from(amount));
                }
            }
            prop_assert!(ledger.eth_balance(sub(), acct(), 1) >= U256::ZERO);
            prop_assert_eq!(ledger.eth_total(acct(), 1), ledger.eth_balance(sub(), acct(), 1));
        }
    }
}
