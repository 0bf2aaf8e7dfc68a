// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Policy service-provider interface.
//!
//! Every encumbrance policy implements one inbound hook: an enrollment
//! notification with veto power. The kernel resolves the hook synchronously
//! from a principal-keyed table during `enter_encumbrance` (and during
//! sub-lease installation); an error from the hook unwinds the lease that
//! triggered it.
//!
//! Policies are referenced by principal address everywhere else in the
//! kernel; the table is the only place a callback lives.

use std::collections::HashMap;

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};

use crate::error::{KernelError, KernelResult};

/// Everything a policy learns about an enrollment it is being offered.
#[derive(Debug, Clone, Copy)]
pub struct Enrollment<'a> {
    /// Principal that granted the lease (the wallet's access manager, or
    /// the transaction manager for sub-leases).
    pub manager: Address,
    /// The encumbered account (wallet address).
    pub account: Address,
    /// Asset tags covered by the lease.
    pub assets: &'a [B256],
    /// When the lease expires.
    pub expiration: DateTime<Utc>,
    /// Opaque enrollment payload, interpreted by the policy.
    pub data: &'a [u8],
}

/// The single hook a policy implements.
///
/// Returning an error vetoes the enrollment; the kernel rolls the lease
/// back and propagates the error verbatim. A policy typically records the
/// manager, expiration, and any per-asset configuration it needs here.
pub trait EncumbrancePolicy {
    fn notify_enrollment(&mut self, enrollment: &Enrollment<'_>) -> KernelResult<()>;
}

/// Principal-keyed table of policy callbacks.
#[derive(Default)]
pub struct PolicyTable {
    hooks: HashMap<Address, Box<dyn EncumbrancePolicy>>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the callback for a principal.
    pub fn register(&mut self, principal: Address, hook: Box<dyn EncumbrancePolicy>) {
        self.hooks.insert(principal, hook);
    }

    pub fn contains(&self, principal: Address) -> bool {
        self.hooks.contains_key(&principal)
    }

    /// Notify the policy registered under `principal`.
    ///
    /// Fails with [`KernelError::UnknownPolicy`] when no callback is
    /// registered: an enrollment that cannot be delivered cannot stand.
    pub fn notify(&mut self, principal: Address, enrollment: &Enrollment<'_>) -> KernelResult<()> {
        match self.hooks.get_mut(&principal) {
            Some(hook) => hook.notify_enrollment(enrollment),
            None => Err(KernelError::UnknownPolicy(principal)),
        }
    }
}

impl std::fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTable")
            .field("principals", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording {
        seen: Vec<Address>,
        accept: bool,
    }

    impl EncumbrancePolicy for Recording {
        fn notify_enrollment(&mut self, enrollment: &Enrollment<'_>) -> KernelResult<()> {
            self.seen.push(enrollment.account);
            if self.accept {
                Ok(())
            } else {
                Err(KernelError::PolicyRejected("not accepting".into()))
            }
        }
    }

    #[test]
    fn notify_reaches_the_registered_hook() {
        let mut table = PolicyTable::new();
        let principal = Address::repeat_byte(1);
        table.register(
            principal,
            Box::new(Recording {
                seen: Vec::new(),
                accept: true,
            }),
        );

        let enrollment = Enrollment {
            manager: Address::repeat_byte(2),
            account: Address::repeat_byte(3),
            assets: &[B256::repeat_byte(4)],
            expiration: Utc::now(),
            data: &[],
        };
        assert!(table.notify(principal, &enrollment).is_ok());
    }

    #[test]
    fn unknown_principal_fails() {
        let mut table = PolicyTable::new();
        let enrollment = Enrollment {
            manager: Address::ZERO,
            account: Address::ZERO,
            assets: &[],
            expiration: Utc::now(),
            data: &[],
        };
        assert!(matches!(
            table.notify(Address::repeat_byte(9), &enrollment),
            Err(KernelError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn veto_propagates_verbatim() {
        let mut table = PolicyTable::new();
        let principal = Address::repeat_byte(1);
        table.register(
            principal,
            Box::new(Recording {
                seen: Vec::new(),
                accept: false,
            }),
        );
        let enrollment = Enrollment {
            manager: Address::ZERO,
            account: Address::ZERO,
            assets: &[],
            expiration: Utc::now(),
            data: &[],
        };
        assert!(matches!(
            table.notify(principal, &enrollment),
            Err(KernelError::PolicyRejected(_))
        ));
    }
}
