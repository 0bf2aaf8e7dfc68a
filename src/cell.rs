// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Delayed-finalization cells.
//!
//! A cell holds a value together with the block number of its last write.
//! A value written in block `N` becomes authoritative only from block
//! `N + 1`, and a cell can be written at most once per block. This is the
//! primitive that keeps ownership transfers, lease installations, and
//! export-request flips invisible to the transaction that produced them:
//! a one-block read-after-write barrier in place of coarser locking.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// A value plus the block at which it was last written.
///
/// Reads through [`DelayedCell::finalized`] require a strictly later block
/// than the last write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedCell<T> {
    value: T,
    /// Block of the last write. `None` means the cell was settled at
    /// construction and has no pending window.
    wrote_at: Option<u64>,
}

impl<T: Default> Default for DelayedCell<T> {
    /// A settled cell holding `T::default()`.
    fn default() -> Self {
        Self {
            value: T::default(),
            wrote_at: None,
        }
    }
}

impl<T: PartialEq> DelayedCell<T> {
    /// Create a cell that is already finalized (no pending window).
    pub fn settled(value: T) -> Self {
        Self {
            value,
            wrote_at: None,
        }
    }

    /// Create a cell whose initial write happened at `block`; it finalizes
    /// at `block + 1`.
    pub fn written(value: T, block: u64) -> Self {
        Self {
            value,
            wrote_at: Some(block),
        }
    }

    /// Overwrite the value at `block`.
    ///
    /// Fails with [`KernelError::Pending`] when the cell was already
    /// written in this block: a decision cannot be mutated twice in the
    /// block that produced it.
    pub fn update_to(&mut self, value: T, block: u64) -> KernelResult<()> {
        if self.wrote_at == Some(block) {
            return Err(KernelError::Pending);
        }
        self.value = value;
        self.wrote_at = Some(block);
        Ok(())
    }

    /// The finalized value, available only from the block after the last
    /// write. Fails with [`KernelError::Pending`] otherwise.
    pub fn finalized(&self, current_block: u64) -> KernelResult<&T> {
        match self.wrote_at {
            Some(wrote_at) if wrote_at >= current_block => Err(KernelError::Pending),
            _ => Ok(&self.value),
        }
    }

    /// Whether the cell is finalized and equal to `expected`.
    ///
    /// Returns `false` (not an error) while the cell is pending.
    pub fn is_finalized_eq(&self, expected: &T, current_block: u64) -> bool {
        self.finalized(current_block)
            .map(|value| value == expected)
            .unwrap_or(false)
    }

    /// The last written value, regardless of finalization. Authorization
    /// decisions must use [`DelayedCell::finalized`] instead.
    pub fn raw(&self) -> &T {
        &self.value
    }

    /// Block of the last write, if any.
    pub fn wrote_at(&self) -> Option<u64> {
        self.wrote_at
    }
}
