// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sealed Storage Module
//!
//! Persistent storage under the host's encrypted data root.
//!
//! ## Security Model
//!
//! - Files are encrypted on the host filesystem
//! - Files are transparently decrypted inside the enclave
//! - The kernel performs **normal filesystem I/O only**; it implements no
//!   storage cryptography of its own
//!
//! ## Storage Layout
//!
//! ```text
//! $KERNEL_DATA_DIR/
//!   state.json      # Full kernel-state snapshot (wallets, leases, ledgers)
//!   history.redb    # Append-only audit history (redb)
//! ```
//!
//! The snapshot is rewritten after every committed mutating dispatch; the
//! history database only grows. Neither is consulted on the dispatch hot
//! path; in-memory state is authoritative within the process lifetime.

pub mod audit;
pub mod history;
pub mod sealed;

use std::path::Path;

use alloy::primitives::Address;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use audit::{AuditEvent, AuditEventType};
pub use history::{HistoryDb, HistoryError};
pub use sealed::{SealedDir, StorageError, StorageResult};

/// Combined persistence handle: snapshot dir plus history database.
pub struct KernelStorage {
    sealed: SealedDir,
    history: HistoryDb,
}

impl KernelStorage {
    /// Open (creating if needed) the storage under `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let sealed = SealedDir::new(root);
        sealed.initialize()?;
        let history = HistoryDb::open(sealed.history())?;
        Ok(Self { sealed, history })
    }

    /// Open the storage under the configured data root
    /// (`KERNEL_DATA_DIR`, default `/data`).
    pub fn open_default() -> StorageResult<Self> {
        let root = std::env::var(crate::config::DATA_DIR_ENV)
            .unwrap_or_else(|_| crate::config::DEFAULT_DATA_DIR.to_string());
        Self::open(root)
    }

    pub fn load_state<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        self.sealed.read_snapshot()
    }

    pub fn persist_state<T: Serialize>(&self, state: &T) -> StorageResult<()> {
        self.sealed.write_snapshot(state)
    }

    pub fn append_audit(&self, event: &AuditEvent) -> StorageResult<()> {
        self.history.append(event)?;
        Ok(())
    }

    /// Up to `limit` audit events for a principal, newest first.
    pub fn recent_events(
        &self,
        principal: Address,
        limit: usize,
    ) -> StorageResult<Vec<AuditEvent>> {
        Ok(self.history.events_for_principal(principal, limit)?)
    }
}
